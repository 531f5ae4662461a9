use std::sync::Arc;

use domain::{NewUser, RepositoryError, User, UserProfile, Username};

use crate::{
    clock::Clock,
    error::ApplicationError,
    password::{check_new_password, PasswordHasher},
    repository::UserRepository,
};

#[derive(Debug, Clone)]
pub struct RegisterUserRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AuthenticateUserRequest {
    pub username: String,
    pub password: String,
}

pub struct UserServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub clock: Arc<dyn Clock>,
}

pub struct UserService {
    deps: UserServiceDependencies,
}

impl UserService {
    pub fn new(deps: UserServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn register(&self, request: RegisterUserRequest) -> Result<User, ApplicationError> {
        let username = Username::parse(request.username)?;
        check_new_password(&request.password)?;

        if self
            .deps
            .user_repository
            .find_by_username(&username)
            .await?
            .is_some()
        {
            return Err(ApplicationError::UserAlreadyExists);
        }

        let password = self.deps.password_hasher.hash(&request.password).await?;
        let new_user = NewUser {
            username,
            password,
            created_at: self.deps.clock.now(),
        };

        // 并发注册同名用户时由唯一约束兜底
        match self.deps.user_repository.create(new_user).await {
            Ok(user) => Ok(user),
            Err(RepositoryError::Conflict) => Err(ApplicationError::UserAlreadyExists),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn authenticate(
        &self,
        request: AuthenticateUserRequest,
    ) -> Result<User, ApplicationError> {
        let username = Username::parse(request.username)?;
        let user = self
            .deps
            .user_repository
            .find_by_username(&username)
            .await?
            .ok_or(ApplicationError::UserNotFound)?;

        let password_ok = self
            .deps
            .password_hasher
            .verify(&request.password, &user.password)
            .await?;
        if !password_ok {
            return Err(ApplicationError::InvalidPassword);
        }

        Ok(user)
    }

    /// 通讯录
    pub async fn directory(&self) -> Result<Vec<UserProfile>, ApplicationError> {
        Ok(self.deps.user_repository.list_profiles().await?)
    }
}
