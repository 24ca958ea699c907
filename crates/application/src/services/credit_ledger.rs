use std::sync::Arc;

use domain::{try_debit, DebitOutcome, DomainError, RootAccount, UserId};
use tracing::{debug, info, warn};

use crate::{error::ApplicationError, repository::UserRepository};

/// 并发扣费冲突时的最大重试次数
const MAX_DEBIT_ATTEMPTS: usize = 5;

const MSG_DEBIT_BUSY: &str = "服务繁忙，请稍后重试 | Server busy, please try again later";

pub struct CreditLedger {
    user_repository: Arc<dyn UserRepository>,
    root: RootAccount,
}

impl CreditLedger {
    pub fn new(user_repository: Arc<dyn UserRepository>, root: RootAccount) -> Self {
        Self {
            user_repository,
            root,
        }
    }

    pub fn root(&self) -> &RootAccount {
        &self.root
    }

    /// 扣除一次对话的积分并立即持久化。
    ///
    /// 写入以读取时的余额为条件，余额在此期间被其他请求修改时重新读取再试。
    pub async fn debit(&self, user_id: UserId) -> Result<DebitOutcome, ApplicationError> {
        for attempt in 1..=MAX_DEBIT_ATTEMPTS {
            let current = self
                .user_repository
                .find_by_id(user_id)
                .await?
                .ok_or(DomainError::UserNotFound)?;

            let mut next = current.clone();
            let outcome = try_debit(&mut next, &self.root);

            if next.score == current.score && next.status == current.status {
                if outcome == DebitOutcome::Denied {
                    info!(user_id = %user_id, "credit exhausted, chat denied");
                }
                return Ok(outcome);
            }

            let written = self
                .user_repository
                .compare_and_set_score(user_id, current.score, next.score, next.status)
                .await?;
            if written {
                match outcome {
                    DebitOutcome::Denied => {
                        info!(user_id = %user_id, "credit exhausted, chat denied")
                    }
                    DebitOutcome::Allowed { balance, .. } => {
                        debug!(user_id = %user_id, balance, "credit debited")
                    }
                }
                return Ok(outcome);
            }

            warn!(user_id = %user_id, attempt, "concurrent balance update, retrying debit");
        }

        warn!(user_id = %user_id, "debit retries exhausted");
        Err(ApplicationError::rejected(MSG_DEBIT_BUSY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_user, InMemoryUserRepository};
    use async_trait::async_trait;
    use domain::{RepositoryError, Score, User, UserEmail, UserStatus};

    fn ledger(users: Arc<InMemoryUserRepository>) -> CreditLedger {
        CreditLedger::new(users, RootAccount::new(Some("root@example.com".into())))
    }

    #[tokio::test]
    async fn debit_is_persisted() {
        let users = Arc::new(InMemoryUserRepository::new());
        let user = sample_user("alice@example.com", 2);
        users.insert(user.clone()).await;

        let ledger = ledger(users.clone());
        let outcome = ledger.debit(user.id).await.unwrap();
        assert_eq!(
            outcome,
            DebitOutcome::Allowed {
                balance: 1,
                charged: true
            }
        );
        assert_eq!(users.get(user.id).await.unwrap().score, 1);
    }

    #[tokio::test]
    async fn exhausted_balance_is_denied_and_marked() {
        let users = Arc::new(InMemoryUserRepository::new());
        let user = sample_user("alice@example.com", 1);
        users.insert(user.clone()).await;
        let ledger = ledger(users.clone());

        assert!(ledger.debit(user.id).await.unwrap().is_allowed());
        let stored = users.get(user.id).await.unwrap();
        assert_eq!((stored.score, stored.status), (0, UserStatus::NoScore));

        assert_eq!(ledger.debit(user.id).await.unwrap(), DebitOutcome::Denied);
        assert_eq!(users.get(user.id).await.unwrap().status, UserStatus::NoScore);
    }

    #[tokio::test]
    async fn root_balance_is_untouched() {
        let users = Arc::new(InMemoryUserRepository::new());
        let root = sample_user("ROOT@example.com", 0);
        users.insert(root.clone()).await;

        let outcome = ledger(users.clone()).debit(root.id).await.unwrap();
        assert_eq!(
            outcome,
            DebitOutcome::Allowed {
                balance: 0,
                charged: false
            }
        );
        assert_eq!(users.get(root.id).await.unwrap().score, 0);
    }

    #[tokio::test]
    async fn concurrent_debits_never_double_spend() {
        let users = Arc::new(InMemoryUserRepository::new());
        let user = sample_user("alice@example.com", 3);
        users.insert(user.clone()).await;
        let ledger = Arc::new(ledger(users.clone()));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move { ledger.debit(user.id).await }));
        }
        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_allowed() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 3);
        let stored = users.get(user.id).await.unwrap();
        assert_eq!((stored.score, stored.status), (0, UserStatus::NoScore));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn contended_debits_match_balance_change() {
        let users = Arc::new(InMemoryUserRepository::new());
        let user = sample_user("alice@example.com", 10);
        users.insert(user.clone()).await;
        let ledger = Arc::new(ledger(users.clone()));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.debit(user.id).await })
            })
            .collect();

        let mut charged = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(DebitOutcome::Allowed { charged: true, .. }) => charged += 1,
                Ok(_) => {}
                Err(ApplicationError::Rejected(message)) => assert_eq!(message, MSG_DEBIT_BUSY),
                Err(other) => panic!("unexpected error {other:?}"),
            }
        }
        let stored = users.get(user.id).await.unwrap();
        assert!(charged <= 10);
        assert_eq!(stored.score, 10 - charged);
    }

    /// 每次条件写入都报告余额已被修改
    struct AlwaysContended(InMemoryUserRepository);

    #[async_trait]
    impl UserRepository for AlwaysContended {
        async fn create(&self, user: User) -> Result<User, RepositoryError> {
            self.0.create(user).await
        }

        async fn update(&self, user: User) -> Result<User, RepositoryError> {
            self.0.update(user).await
        }

        async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
            self.0.find_by_id(id).await
        }

        async fn find_by_email(&self, email: &UserEmail) -> Result<Option<User>, RepositoryError> {
            self.0.find_by_email(email).await
        }

        async fn compare_and_set_score(
            &self,
            _id: UserId,
            _expected: Score,
            _score: Score,
            _status: UserStatus,
        ) -> Result<bool, RepositoryError> {
            Ok(false)
        }

        async fn add_score(&self, id: UserId, amount: Score) -> Result<User, RepositoryError> {
            self.0.add_score(id, amount).await
        }
    }

    #[tokio::test]
    async fn exhausted_retries_are_a_retryable_rejection() {
        let inner = InMemoryUserRepository::new();
        let user = sample_user("alice@example.com", 4);
        inner.insert(user.clone()).await;
        let users = Arc::new(AlwaysContended(inner));

        let ledger = CreditLedger::new(
            users.clone(),
            RootAccount::new(Some("root@example.com".into())),
        );
        let result = ledger.debit(user.id).await;
        assert!(matches!(
            result,
            Err(ApplicationError::Rejected(ref message)) if message == MSG_DEBIT_BUSY
        ));
        assert_eq!(users.0.get(user.id).await.unwrap().score, 4);
    }

    #[tokio::test]
    async fn unknown_user_is_an_error() {
        let users = Arc::new(InMemoryUserRepository::new());
        let result = ledger(users).debit(UserId::from(uuid::Uuid::new_v4())).await;
        assert!(matches!(
            result,
            Err(ApplicationError::Domain(DomainError::UserNotFound))
        ));
    }
}
