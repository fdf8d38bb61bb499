use std::fmt;

#[derive(Debug)]
pub enum BistroSDKError {
    /// 网络层错误（连接失败、超时等）
    Transport(String),
    /// 服务端返回非 2xx
    Http {
        status: u16,
        message: String,
    },
    Serialization(String),
    InvalidInput(String),
    NotFound(String),
    Config(String),
    Realtime(String),
    Storage(String),
    /// 员工开通失败（已尝试回滚）
    Provisioning(String),
    IO(String),
    Other(String),
}

impl fmt::Display for BistroSDKError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BistroSDKError::Transport(e) => write!(f, "Transport error: {}", e),
            BistroSDKError::Http { status, message } => {
                write!(f, "HTTP error [{}]: {}", status, message)
            }
            BistroSDKError::Serialization(e) => write!(f, "Serialization error: {}", e),
            BistroSDKError::InvalidInput(e) => write!(f, "Invalid input: {}", e),
            BistroSDKError::NotFound(e) => write!(f, "Not found: {}", e),
            BistroSDKError::Config(e) => write!(f, "Config error: {}", e),
            BistroSDKError::Realtime(e) => write!(f, "Realtime error: {}", e),
            BistroSDKError::Storage(e) => write!(f, "Storage error: {}", e),
            BistroSDKError::Provisioning(e) => write!(f, "Provisioning error: {}", e),
            BistroSDKError::IO(e) => write!(f, "IO error: {}", e),
            BistroSDKError::Other(e) => write!(f, "Other error: {}", e),
        }
    }
}

impl std::error::Error for BistroSDKError {}

impl From<serde_json::Error> for BistroSDKError {
    fn from(error: serde_json::Error) -> Self {
        BistroSDKError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for BistroSDKError {
    fn from(error: std::io::Error) -> Self {
        BistroSDKError::IO(error.to_string())
    }
}

impl From<reqwest::Error> for BistroSDKError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            return BistroSDKError::Serialization(error.to_string());
        }
        match error.status() {
            Some(status) => BistroSDKError::Http {
                status: status.as_u16(),
                message: error.to_string(),
            },
            None => BistroSDKError::Transport(error.to_string()),
        }
    }
}

impl BistroSDKError {
    /// 获取 HTTP 状态码（如果这是一个 HTTP 错误）
    pub fn http_status(&self) -> Option<u16> {
        match self {
            BistroSDKError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 判断是否是网络层错误（可等待下一次轮询/通知恢复）
    pub fn is_transport(&self) -> bool {
        matches!(self, BistroSDKError::Transport(_))
    }

    /// 给 UI 展示的错误文案（不含错误分类前缀）
    pub fn user_message(&self) -> String {
        match self {
            BistroSDKError::Http { message, .. } => message.clone(),
            BistroSDKError::Transport(e)
            | BistroSDKError::Serialization(e)
            | BistroSDKError::InvalidInput(e)
            | BistroSDKError::NotFound(e)
            | BistroSDKError::Config(e)
            | BistroSDKError::Realtime(e)
            | BistroSDKError::Storage(e)
            | BistroSDKError::Provisioning(e)
            | BistroSDKError::IO(e)
            | BistroSDKError::Other(e) => e.clone(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BistroSDKError>;
