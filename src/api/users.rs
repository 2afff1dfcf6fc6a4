use std::sync::Arc;

use crate::auth::Role;
use crate::error::ApiError;
use crate::http_client::ClassroomHttpClient;
use crate::models::user::UpdateRoleRequest;
use crate::models::User;

#[derive(Clone)]
pub struct UserService {
    client: Arc<ClassroomHttpClient>,
}

impl UserService {
    pub fn new(client: Arc<ClassroomHttpClient>) -> Self {
        Self { client }
    }

    pub async fn me(&self) -> Result<User, ApiError> {
        self.client.send_json(self.client.get("/users/me")).await
    }

    /// All users, admin only
    pub async fn list(&self) -> Result<Vec<User>, ApiError> {
        self.client.send_json(self.client.get("/users")).await
    }

    /// Change a user's role
    ///
    /// Sensitive: the server may ask for step-up verification first.
    pub async fn update_role(&self, user_id: &str, role: Role) -> Result<User, ApiError> {
        let user: User = self
            .client
            .send_json(
                self.client
                    .put(&format!("/users/{}/role", user_id))
                    .json(&UpdateRoleRequest { role_id: role.id() }),
            )
            .await?;

        tracing::info!(user_id = %user_id, role = role.name(), "Updated user role");
        Ok(user)
    }
}
