use std::sync::Arc;

use chrono::Duration;
use config::{CodeConfig, SiteConfig};
use domain::{
    CodePurpose, DomainError, Recharge, RepositoryError, RootAccount, Score, User, UserEmail,
    UserId, UserStatus, VerificationCode,
};
use rand::{distr::Alphanumeric, Rng};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    clock::Clock,
    error::ApplicationError,
    mailer::Mailer,
    password::PasswordHasher,
    repository::{RechargeRepository, UserRepository, VerificationCodeRepository},
};

const MSG_REGISTER_DISABLED: &str = "注册账号功能未启用 | Register account is disabled!";
const MSG_INVALID_EMAIL: &str = "请输入正确的邮箱 | Please enter a valid email address.";
const MSG_SUFFIX_NOT_ALLOWED: &str = "该邮箱后缀不支持 | The email service provider is not allowed";
const MSG_EMAIL_EXISTS: &str = "邮箱已存在 | The email exists";
const MSG_USER_NOT_EXIST: &str = "用户不存在 | User does not exist.";
const MSG_USER_NOT_ACTIVE: &str = "用户不存在或账户未激活";
const MSG_BAD_CODE: &str = "验证码不正确";
const MSG_EMPTY_TOKEN: &str = "Secret key is empty";
const MSG_VERIFY_FAILED: &str = "验证失败 | Verify failed";

#[derive(Debug, Clone)]
pub struct RegisterUserRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// 管理员账号直接激活
    Active,
    /// 已发送验证邮件
    VerificationSent,
}

#[derive(Debug, Clone)]
pub struct AuthenticateUserRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub password: String,
    pub code: String,
}

#[derive(Debug, Clone)]
pub struct RechargeRequest {
    pub email: String,
    pub score: Score,
}

#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub email: String,
    pub amount: Score,
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
    pub remark: Option<String>,
}

/// 账号相关的站点策略
#[derive(Debug, Clone)]
pub struct AccountSettings {
    pub site: SiteConfig,
    pub codes: CodeConfig,
    pub root: RootAccount,
}

pub struct UserServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub code_repository: Arc<dyn VerificationCodeRepository>,
    pub recharge_repository: Arc<dyn RechargeRepository>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub mailer: Arc<dyn Mailer>,
    pub clock: Arc<dyn Clock>,
    pub settings: AccountSettings,
}

pub struct UserService {
    deps: UserServiceDependencies,
}

impl UserService {
    pub fn new(deps: UserServiceDependencies) -> Self {
        Self { deps }
    }

    pub fn settings(&self) -> &AccountSettings {
        &self.deps.settings
    }

    pub fn is_root(&self, user: &User) -> bool {
        self.deps.settings.root.is_root(user)
    }

    pub async fn register(
        &self,
        request: RegisterUserRequest,
    ) -> Result<RegisterOutcome, ApplicationError> {
        let site = &self.deps.settings.site;
        if !site.register_enabled {
            return Err(ApplicationError::rejected(MSG_REGISTER_DISABLED));
        }
        let email = UserEmail::parse(request.username)
            .map_err(|_| ApplicationError::rejected(MSG_INVALID_EMAIL))?;
        if !site.allows_registration_email(email.as_str()) {
            return Err(ApplicationError::rejected(MSG_SUFFIX_NOT_ALLOWED));
        }
        if request.password.is_empty() {
            return Err(DomainError::invalid_argument("password", "cannot be empty").into());
        }
        if self
            .deps
            .user_repository
            .find_by_email(&email)
            .await?
            .is_some()
        {
            return Err(ApplicationError::rejected(MSG_EMAIL_EXISTS));
        }

        let password_hash = self.deps.password_hasher.hash(&request.password).await?;
        let now = self.deps.clock.now();
        let mut user = User::register(
            UserId::from(Uuid::new_v4()),
            email.clone(),
            password_hash,
            site.initial_score,
            now,
        );
        let root = self.deps.settings.root.is_root_email(email.as_str());
        if root {
            user.verify(now);
        }

        self.deps
            .user_repository
            .create(user)
            .await
            .map_err(|err| match err {
                RepositoryError::Conflict => ApplicationError::rejected(MSG_EMAIL_EXISTS),
                other => other.into(),
            })?;

        if root {
            info!(email = %email, "root account registered");
            return Ok(RegisterOutcome::Active);
        }

        let token = random_token(32);
        let ttl = Duration::minutes(self.deps.settings.codes.verify_ttl_minutes);
        self.deps
            .code_repository
            .put(VerificationCode::new(
                email.as_str(),
                CodePurpose::Verify,
                token.clone(),
                now + ttl,
            ))
            .await?;

        let link = format!(
            "{}/#/chat/?verifytoken={}",
            site.site_domain.trim_end_matches('/'),
            token
        );
        let body = format!(
            "<p>感谢注册 {title}，请点击链接完成邮箱验证 | Click the link to verify your email:</p>\
             <p><a href=\"{link}\">{link}</a></p>",
            title = site.title,
        );
        self.deps
            .mailer
            .send(email.as_str(), &format!("{} 账号验证", site.title), &body)
            .await?;
        info!(email = %email, "user registered, verification mail sent");
        Ok(RegisterOutcome::VerificationSent)
    }

    /// 消费邮件中的验证令牌并激活账号。
    pub async fn verify(&self, token: &str) -> Result<User, ApplicationError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ApplicationError::rejected(MSG_EMPTY_TOKEN));
        }
        let now = self.deps.clock.now();
        let code = self
            .deps
            .code_repository
            .take_by_code(token, CodePurpose::Verify, now)
            .await?
            .ok_or_else(|| ApplicationError::rejected(MSG_VERIFY_FAILED))?;
        let email = UserEmail::parse(code.key)?;
        let mut user = self
            .deps
            .user_repository
            .find_by_email(&email)
            .await?
            .ok_or_else(|| ApplicationError::rejected(MSG_VERIFY_FAILED))?;
        if user.status == UserStatus::PreVerify {
            user.verify(now);
            user = self.deps.user_repository.update(user).await?;
        }
        info!(user_id = %user.id, "email verified");
        Ok(user)
    }

    pub async fn authenticate(
        &self,
        request: AuthenticateUserRequest,
    ) -> Result<User, ApplicationError> {
        let email =
            UserEmail::parse(request.username).map_err(|_| ApplicationError::InvalidCredentials)?;
        let user = self
            .deps
            .user_repository
            .find_by_email(&email)
            .await?
            .ok_or(ApplicationError::InvalidCredentials)?;
        let hashed = user
            .password
            .as_ref()
            .ok_or(ApplicationError::InvalidCredentials)?;

        let password_ok = self
            .deps
            .password_hasher
            .verify(&request.password, hashed)
            .await?;
        if !password_ok {
            return Err(ApplicationError::InvalidCredentials);
        }

        user.ensure_can_login()?;
        Ok(user)
    }

    /// 重新读取令牌对应的用户；不存在或已停用时视为未认证。
    pub async fn active_user(&self, user_id: UserId) -> Result<User, ApplicationError> {
        let user = self
            .deps
            .user_repository
            .find_by_id(user_id)
            .await?
            .ok_or(ApplicationError::Authentication)?;
        if !user.is_active() {
            return Err(ApplicationError::Authentication);
        }
        Ok(user)
    }

    /// 管理员接口的权限检查，基于实时的用户记录。
    pub async fn require_root(&self, user_id: UserId) -> Result<User, ApplicationError> {
        let user = self
            .deps
            .user_repository
            .find_by_id(user_id)
            .await?
            .ok_or(ApplicationError::Authorization)?;
        if user.status != UserStatus::Normal || !self.is_root(&user) {
            return Err(ApplicationError::Authorization);
        }
        Ok(user)
    }

    pub async fn update_profile(
        &self,
        user_id: UserId,
        request: UpdateProfileRequest,
    ) -> Result<User, ApplicationError> {
        let mut user = self
            .deps
            .user_repository
            .find_by_id(user_id)
            .await?
            .filter(User::is_active)
            .ok_or_else(|| ApplicationError::rejected(MSG_USER_NOT_EXIST))?;
        user.update_profile(request.name, request.avatar, request.description);
        Ok(self.deps.user_repository.update(user).await?)
    }

    pub async fn send_reset_code(&self, email: &str) -> Result<(), ApplicationError> {
        let email =
            UserEmail::parse(email).map_err(|_| ApplicationError::rejected(MSG_INVALID_EMAIL))?;
        let code = reset_code();
        let now = self.deps.clock.now();
        let ttl = Duration::minutes(self.deps.settings.codes.reset_code_ttl_minutes);
        self.deps
            .code_repository
            .put(VerificationCode::new(
                email.as_str(),
                CodePurpose::Reset,
                code.clone(),
                now + ttl,
            ))
            .await?;

        let body = format!("<p>您的验证码是 | Your verification code is: <b>{code}</b></p>");
        if let Err(err) = self
            .deps
            .mailer
            .send(email.as_str(), "重置密码验证码 | Password reset code", &body)
            .await
        {
            warn!(error = %err, "failed to deliver reset code");
            return Err(err.into());
        }
        Ok(())
    }

    pub async fn reset_password(&self, request: ResetPasswordRequest) -> Result<(), ApplicationError> {
        let email = UserEmail::parse(request.email)
            .map_err(|_| ApplicationError::rejected(MSG_INVALID_EMAIL))?;
        let now = self.deps.clock.now();
        let stored = self
            .deps
            .code_repository
            .find(email.as_str(), CodePurpose::Reset, now)
            .await?;
        if !stored.is_some_and(|code| code.accepts(&request.code, now)) {
            return Err(ApplicationError::rejected(MSG_BAD_CODE));
        }

        let mut user = self
            .deps
            .user_repository
            .find_by_email(&email)
            .await?
            .filter(|user| user.status != UserStatus::PreVerify)
            .ok_or_else(|| ApplicationError::rejected(MSG_USER_NOT_ACTIVE))?;
        if request.password.is_empty() {
            return Err(DomainError::invalid_argument("password", "cannot be empty").into());
        }

        let hash = self.deps.password_hasher.hash(&request.password).await?;
        user.set_password(hash);
        self.deps.user_repository.update(user).await?;
        self.deps
            .code_repository
            .remove(email.as_str(), CodePurpose::Reset)
            .await?;
        info!(email = %email, "password reset");
        Ok(())
    }

    /// 管理员直接设置用户余额。
    pub async fn recharge(&self, request: RechargeRequest) -> Result<User, ApplicationError> {
        let email = UserEmail::parse(request.email)
            .map_err(|_| ApplicationError::rejected(MSG_USER_NOT_EXIST))?;
        let mut user = self
            .deps
            .user_repository
            .find_by_email(&email)
            .await?
            .filter(User::is_active)
            .ok_or_else(|| ApplicationError::rejected(MSG_USER_NOT_EXIST))?;
        user.set_score(request.score);
        let user = self.deps.user_repository.update(user).await?;
        info!(user_id = %user.id, score = user.score, "score set by root");
        Ok(user)
    }

    /// 记录一笔充值并把金额加到余额上。
    pub async fn payment(&self, request: PaymentRequest) -> Result<User, ApplicationError> {
        let email = UserEmail::parse(request.email)
            .map_err(|_| ApplicationError::rejected(MSG_USER_NOT_ACTIVE))?;
        let user = self
            .deps
            .user_repository
            .find_by_email(&email)
            .await?
            .filter(|user| user.status != UserStatus::PreVerify)
            .ok_or_else(|| ApplicationError::rejected(MSG_USER_NOT_ACTIVE))?;

        let recharge = Recharge::new(
            user.id,
            request.amount,
            request.payment_method,
            request.transaction_id,
            Some(request.remark.unwrap_or_default()),
            self.deps.clock.now(),
        )?;
        let recharge = self.deps.recharge_repository.append(recharge).await?;
        let user = self
            .deps
            .user_repository
            .add_score(user.id, recharge.amount)
            .await?;
        info!(
            user_id = %user.id,
            amount = recharge.amount,
            transaction_id = %recharge.transaction_id,
            "payment recorded"
        );
        Ok(user)
    }
}

fn random_token(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn reset_code() -> String {
    Uuid::new_v4().simple().to_string()[..6].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::{MailError, MockMailer};
    use crate::testing::{
        sample_user, InMemoryRechargeRepository, InMemoryUserRepository,
        InMemoryVerificationCodeRepository, ManualClock, PlainPasswordHasher, RecordingMailer,
    };
    use chrono::Utc;

    struct Fixture {
        service: UserService,
        users: Arc<InMemoryUserRepository>,
        codes: Arc<InMemoryVerificationCodeRepository>,
        recharges: Arc<InMemoryRechargeRepository>,
        mailer: Arc<RecordingMailer>,
        clock: Arc<ManualClock>,
    }

    fn settings() -> AccountSettings {
        AccountSettings {
            site: SiteConfig {
                register_mails: "@example.com".into(),
                site_domain: "https://chat.example.com/".into(),
                ..SiteConfig::default()
            },
            codes: CodeConfig::default(),
            root: RootAccount::new(Some("root@example.com".into())),
        }
    }

    fn fixture_with(mailer: Arc<dyn Mailer>, recording: Arc<RecordingMailer>) -> Fixture {
        let users = Arc::new(InMemoryUserRepository::new());
        let codes = Arc::new(InMemoryVerificationCodeRepository::new());
        let recharges = Arc::new(InMemoryRechargeRepository::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let service = UserService::new(UserServiceDependencies {
            user_repository: users.clone(),
            code_repository: codes.clone(),
            recharge_repository: recharges.clone(),
            password_hasher: Arc::new(PlainPasswordHasher),
            mailer,
            clock: clock.clone(),
            settings: settings(),
        });
        Fixture {
            service,
            users,
            codes,
            recharges,
            mailer: recording,
            clock,
        }
    }

    fn fixture() -> Fixture {
        let mailer = Arc::new(RecordingMailer::new());
        fixture_with(mailer.clone(), mailer)
    }

    fn register(username: &str) -> RegisterUserRequest {
        RegisterUserRequest {
            username: username.into(),
            password: "secret".into(),
        }
    }

    fn login(username: &str, password: &str) -> AuthenticateUserRequest {
        AuthenticateUserRequest {
            username: username.into(),
            password: password.into(),
        }
    }

    fn rejected_with(result: Result<impl std::fmt::Debug, ApplicationError>, message: &str) {
        match result {
            Err(ApplicationError::Rejected(actual)) => assert_eq!(actual, message),
            other => panic!("expected rejection {message:?}, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn registration_requires_verification_before_login() {
        let fixture = fixture();
        let outcome = fixture.service.register(register("Bob@Example.com")).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::VerificationSent);

        let result = fixture.service.authenticate(login("bob@example.com", "secret")).await;
        assert!(matches!(
            result,
            Err(ApplicationError::Domain(DomainError::UserStatusRejected { .. }))
        ));

        let sent = fixture.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "bob@example.com");
        let token = fixture
            .codes
            .peek("bob@example.com", CodePurpose::Verify)
            .await
            .unwrap()
            .code;
        assert!(sent[0]
            .body
            .contains(&format!("https://chat.example.com/#/chat/?verifytoken={token}")));

        let user = fixture.service.verify(&token).await.unwrap();
        assert_eq!(user.status, UserStatus::Normal);
        assert_eq!(user.score, 10);
        assert!(fixture
            .service
            .authenticate(login("BOB@example.com", "secret"))
            .await
            .is_ok());

        rejected_with(fixture.service.verify(&token).await, MSG_VERIFY_FAILED);
    }

    #[tokio::test]
    async fn root_account_is_active_immediately() {
        let fixture = fixture();
        let outcome = fixture.service.register(register("root@example.com")).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::Active);
        assert!(fixture.mailer.sent().is_empty());
        let user = fixture
            .service
            .authenticate(login("root@example.com", "secret"))
            .await
            .unwrap();
        assert!(fixture.service.is_root(&user));
        assert!(fixture.service.require_root(user.id).await.is_ok());
    }

    #[tokio::test]
    async fn registration_rules() {
        let fixture = fixture();
        rejected_with(fixture.service.register(register("not-an-email")).await, MSG_INVALID_EMAIL);
        rejected_with(
            fixture.service.register(register("bob@gmail.com")).await,
            MSG_SUFFIX_NOT_ALLOWED,
        );
        fixture.service.register(register("bob@example.com")).await.unwrap();
        rejected_with(
            fixture.service.register(register("BOB@example.com")).await,
            MSG_EMAIL_EXISTS,
        );
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credentials() {
        let fixture = fixture();
        fixture.users.insert(sample_user("alice@example.com", 10)).await;
        let result = fixture.service.authenticate(login("alice@example.com", "nope")).await;
        assert!(matches!(result, Err(ApplicationError::InvalidCredentials)));
        let result = fixture.service.authenticate(login("ghost@example.com", "secret")).await;
        assert!(matches!(result, Err(ApplicationError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn mail_failure_is_reported() {
        let mut mock = MockMailer::new();
        mock.expect_send()
            .times(1)
            .returning(|_, _, _| Err(MailError::Delivery("smtp down".into())));
        let fixture = fixture_with(Arc::new(mock), Arc::new(RecordingMailer::new()));

        let result = fixture.service.register(register("carol@example.com")).await;
        assert!(matches!(result, Err(ApplicationError::Mail(_))));
    }

    #[tokio::test]
    async fn reset_password_with_code() {
        let fixture = fixture();
        let user = sample_user("alice@example.com", 10);
        fixture.users.insert(user.clone()).await;

        fixture.service.send_reset_code("alice@example.com").await.unwrap();
        let code = fixture
            .codes
            .peek("alice@example.com", CodePurpose::Reset)
            .await
            .unwrap()
            .code;
        assert_eq!(code.len(), 6);

        rejected_with(
            fixture
                .service
                .reset_password(ResetPasswordRequest {
                    email: "alice@example.com".into(),
                    password: "new-secret".into(),
                    code: "000000x".into(),
                })
                .await,
            MSG_BAD_CODE,
        );

        fixture
            .service
            .reset_password(ResetPasswordRequest {
                email: "alice@example.com".into(),
                password: "new-secret".into(),
                code: code.clone(),
            })
            .await
            .unwrap();
        assert!(fixture
            .service
            .authenticate(login("alice@example.com", "new-secret"))
            .await
            .is_ok());
        assert!(fixture
            .codes
            .peek("alice@example.com", CodePurpose::Reset)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn expired_reset_code_is_rejected() {
        let fixture = fixture();
        fixture.users.insert(sample_user("alice@example.com", 10)).await;
        fixture.service.send_reset_code("alice@example.com").await.unwrap();
        let code = fixture
            .codes
            .peek("alice@example.com", CodePurpose::Reset)
            .await
            .unwrap()
            .code;

        fixture.clock.advance(Duration::minutes(11));
        rejected_with(
            fixture
                .service
                .reset_password(ResetPasswordRequest {
                    email: "alice@example.com".into(),
                    password: "new-secret".into(),
                    code,
                })
                .await,
            MSG_BAD_CODE,
        );
    }

    #[tokio::test]
    async fn recharge_restores_exhausted_user() {
        let fixture = fixture();
        let mut user = sample_user("alice@example.com", 0);
        user.status = UserStatus::NoScore;
        fixture.users.insert(user.clone()).await;

        let updated = fixture
            .service
            .recharge(RechargeRequest {
                email: "alice@example.com".into(),
                score: 20,
            })
            .await
            .unwrap();
        assert_eq!((updated.score, updated.status), (20, UserStatus::Normal));
    }

    #[tokio::test]
    async fn payment_appends_record_and_adds_amount() {
        let fixture = fixture();
        let mut user = sample_user("alice@example.com", 0);
        user.status = UserStatus::NoScore;
        fixture.users.insert(user.clone()).await;

        let updated = fixture
            .service
            .payment(PaymentRequest {
                email: "alice@example.com".into(),
                amount: 15,
                payment_method: None,
                transaction_id: None,
                remark: None,
            })
            .await
            .unwrap();
        assert_eq!((updated.score, updated.status), (15, UserStatus::Normal));

        let records = fixture.recharges.list_by_user(user.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payment_method, "手动充值");
        assert!(records[0].transaction_id.starts_with("0101"));
        assert_eq!(records[0].remark.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn non_root_is_forbidden() {
        let fixture = fixture();
        let user = sample_user("alice@example.com", 10);
        fixture.users.insert(user.clone()).await;
        assert!(matches!(
            fixture.service.require_root(user.id).await,
            Err(ApplicationError::Authorization)
        ));
    }

    #[tokio::test]
    async fn profile_update_keeps_score() {
        let fixture = fixture();
        let user = sample_user("alice@example.com", 3);
        fixture.users.insert(user.clone()).await;
        let updated = fixture
            .service
            .update_profile(
                user.id,
                UpdateProfileRequest {
                    name: Some("Alice".into()),
                    avatar: None,
                    description: Some("hi".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name.as_deref(), Some("Alice"));
        assert_eq!(updated.score, 3);
    }
}
