//! 客户端层错误类型

use thiserror::Error;
use vesc_driver::DriverError;

#[derive(Error, Debug)]
pub enum ClientError {
    /// 服务、编解码或传输层错误，原样透传
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// 总线上没有可绑定的控制器
    #[error("No active VESC controller found")]
    NoTarget,
}

impl ClientError {
    /// 参数在发送前被拒绝（未产生任何总线 IO）
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            ClientError::Driver(DriverError::InvalidArgument(_))
                | ClientError::Driver(DriverError::Protocol(
                    vesc_protocol::ProtocolError::InvalidArgument { .. }
                ))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesc_protocol::ProtocolError;

    #[test]
    fn test_driver_errors_are_transparent() {
        let err: ClientError = DriverError::NotRunning.into();
        assert_eq!(err.to_string(), "CAN service is not running");
        assert!(!err.is_invalid_argument());
    }

    #[test]
    fn test_invalid_argument_detection() {
        let err: ClientError = DriverError::Protocol(ProtocolError::InvalidArgument {
            field: "duty",
            value: "1.5".to_string(),
        })
        .into();
        assert!(err.is_invalid_argument());
        assert!(!ClientError::NoTarget.is_invalid_argument());
    }
}
