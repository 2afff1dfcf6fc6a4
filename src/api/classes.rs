use std::sync::Arc;

use crate::error::ApiError;
use crate::http_client::ClassroomHttpClient;
use crate::models::class::{AddStudentRequest, CreateClassRequest};
use crate::models::Class;
use crate::validation::{validate_email, validate_name};

#[derive(Clone)]
pub struct ClassService {
    client: Arc<ClassroomHttpClient>,
}

impl ClassService {
    pub fn new(client: Arc<ClassroomHttpClient>) -> Self {
        Self { client }
    }

    /// Classes visible to the current user
    pub async fn list(&self) -> Result<Vec<Class>, ApiError> {
        self.client.send_json(self.client.get("/classes")).await
    }

    pub async fn get(&self, class_id: &str) -> Result<Class, ApiError> {
        self.client
            .send_json(self.client.get(&format!("/classes/{}", class_id)))
            .await
    }

    pub async fn create(&self, request: &CreateClassRequest) -> Result<Class, ApiError> {
        validate_name("Class name", &request.name)?;

        let class: Class = self
            .client
            .send_json(self.client.post("/classes").json(request))
            .await?;

        tracing::info!(class_id = %class.id, name = %class.name, "Created class");
        Ok(class)
    }

    /// Enrol a student by email
    pub async fn add_student(&self, class_id: &str, email: &str) -> Result<(), ApiError> {
        let email = email.trim();
        validate_email(email)?;

        self.client
            .send_empty(
                self.client
                    .post(&format!("/classes/{}/students", class_id))
                    .json(&AddStudentRequest { email }),
            )
            .await
    }
}
