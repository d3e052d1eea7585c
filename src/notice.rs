use crate::error::{ClientError, ClientResult};

/// Transient user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Success(String),
    Error(String),
}

impl Notice {
    pub fn from_error(error: &ClientError) -> Self {
        let text = match error {
            ClientError::Transport(_) => "AI service is unreachable, check your network connection".to_string(),
            ClientError::Backend { message, .. } => format!("AI service error: {message}"),
            ClientError::EmptyResponse => "AI service returned an empty reply".to_string(),
            ClientError::Validation(message) => message.clone(),
            ClientError::Busy { .. } => "please wait for the current reply to finish".to_string(),
            ClientError::NotFound(what) => format!("{what} no longer exists"),
            other => format!("something went wrong: {other}"),
        };
        Notice::Error(text)
    }

    pub fn from_result<T>(result: &ClientResult<T>, success: impl Into<String>) -> Self {
        match result {
            Ok(_) => Notice::Success(success.into()),
            Err(e) => Self::from_error(e),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Notice::Success(text) | Notice::Error(text) => text,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Notice::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_are_prefixed() {
        let notice = Notice::from_error(&ClientError::Backend {
            status: 500,
            message: "model overloaded".into(),
        });
        assert!(notice.is_error());
        assert_eq!(notice.message(), "AI service error: model overloaded");
    }

    #[test]
    fn validation_messages_pass_through() {
        let result: ClientResult<()> = Err(ClientError::Validation("API key is required".into()));
        assert_eq!(
            Notice::from_result(&result, "saved"),
            Notice::Error("API key is required".into())
        );
        assert_eq!(Notice::from_result(&Ok(()), "settings saved"), Notice::Success("settings saved".into()));
    }
}
