use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;
use crate::value_objects::{Score, Timestamp, UserId};

/// 默认充值方式。
pub const DEFAULT_PAYMENT_METHOD: &str = "手动充值";

/// 一次充值记录，只追加不修改。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recharge {
    pub id: Uuid,
    pub user_id: UserId,
    pub amount: Score,
    pub payment_method: String,
    pub transaction_id: String,
    pub remark: Option<String>,
    pub created_at: Timestamp,
}

impl Recharge {
    /// 充值金额必须为正；未提供支付方式和流水号时使用手动充值的默认值。
    pub fn new(
        user_id: UserId,
        amount: Score,
        payment_method: Option<String>,
        transaction_id: Option<String>,
        remark: Option<String>,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        if amount <= 0 {
            return Err(DomainError::invalid_argument("amount", "must be positive"));
        }
        let payment_method = payment_method
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PAYMENT_METHOD.to_string());
        let transaction_id = transaction_id
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| format!("0101{}", now.timestamp_millis()));
        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            amount,
            payment_method,
            transaction_id,
            remark,
            created_at: now,
        })
    }
}
