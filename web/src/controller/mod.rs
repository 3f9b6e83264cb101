use serde::Serialize;
pub(crate) mod health_check_controller;
pub(crate) mod stats_controller;
pub(crate) mod stream_controller;
pub(crate) mod token_controller;

#[derive(Debug, Serialize)]
struct ApiResponse<T: Serialize> {
    status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(status_code: u16, data: T) -> Self {
        Self {
            status_code,
            data: Some(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn test_api_response_wraps_data() {
        let response = ApiResponse::new(StatusCode::CREATED.into(), json!({"id": 3}));

        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value, json!({"status_code": 201, "data": {"id": 3}}));
    }

    #[test]
    fn test_api_response_omits_missing_data() {
        let response: ApiResponse<()> = ApiResponse {
            status_code: StatusCode::NO_CONTENT.into(),
            data: None,
        };

        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            json!({"status_code": 204}).to_string()
        );
    }
}
