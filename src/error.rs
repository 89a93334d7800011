use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeeperError {
    #[error("Ошибка ввода-вывода: {0}")]
    Io(#[from] std::io::Error),

    #[error("Не удалось подключиться к X серверу: {0}")]
    Connect(#[from] x11rb::errors::ConnectError),

    #[error("Ошибка соединения X11: {0}")]
    Connection(#[from] x11rb::errors::ConnectionError),

    #[error("Ошибка ответа X11: {0}")]
    Reply(#[from] x11rb::errors::ReplyError),

    #[error("Расширение недоступно: {0}")]
    ExtensionUnavailable(String),

    #[error("Некорректный дисплей: {0}")]
    InvalidDisplay(String),

    #[error("Другой экземпляр уже запущен (блокировка {0})")]
    AlreadyRunning(String),

    #[error("Соединение с X сервером потеряно")]
    ConnectionLost,

    #[error("Внутренняя ошибка: {0}")]
    Internal(String),
}

impl KeeperError {
    pub fn invalid_display<T>(msg: impl Into<String>) -> Result<T> {
        Err(KeeperError::InvalidDisplay(msg.into()))
    }

    /// Ошибки, после которых соединение использовать уже нельзя
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            KeeperError::ConnectionLost
                | KeeperError::Connection(_)
                | KeeperError::Reply(x11rb::errors::ReplyError::ConnectionError(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, KeeperError>;

// Удобные макросы для создания ошибок
#[macro_export]
macro_rules! keeper_error {
    (extension_unavailable, $($arg:tt)*) => {
        $crate::error::KeeperError::ExtensionUnavailable(format!($($arg)*))
    };
    (internal, $($arg:tt)*) => {
        $crate::error::KeeperError::Internal(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_lost_classification() {
        assert!(KeeperError::ConnectionLost.is_connection_lost());
        assert!(!KeeperError::Internal("x".to_string()).is_connection_lost());
        assert!(!crate::keeper_error!(extension_unavailable, "XKB {}", 1).is_connection_lost());
        assert!(!KeeperError::AlreadyRunning("/run/x.lock".to_string()).is_connection_lost());
    }

    #[test]
    fn test_invalid_display_helper() {
        let result: Result<u8> = KeeperError::invalid_display("wayland-0");
        assert!(matches!(result, Err(KeeperError::InvalidDisplay(msg)) if msg == "wayland-0"));
    }
}
