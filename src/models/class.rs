use serde::{Deserialize, Serialize};

// ==================================================================================================
// Classes
// ==================================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Class {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_id: Option<String>,
    #[serde(default)]
    pub student_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateClassRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddStudentRequest<'a> {
    pub email: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_class_optional_fields_default() {
        let class: Class = serde_json::from_value(json!({"id": "c-1", "name": "Algebra"})).unwrap();
        assert_eq!(class.description, None);
        assert_eq!(class.teacher_id, None);
        assert_eq!(class.student_count, 0);
    }

    #[test]
    fn test_create_request_omits_missing_description() {
        let request = CreateClassRequest {
            name: "Algebra".to_string(),
            description: None,
        };
        assert_eq!(serde_json::to_value(&request).unwrap(), json!({"name": "Algebra"}));
    }
}
