use std::cell::RefCell;
use std::ffi::CString;
use std::{fmt, result};

use log::error;

use crate::connection::protocol::Status;

/// A result of a function that may return a `LimeError`.
pub type Result<T> = result::Result<T, LimeError>;

/// errno-compatible error codes reported through the C API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Interrupted = 4,
    Io = 5,
    Busy = 16,
    NoDevice = 19,
    InvalidArgument = 22,
    OutOfRange = 34,
    NotSupported = 95,
    NotConnected = 107,
    TimedOut = 110,
}

#[derive(Debug)]
pub struct ApiError {
    pub code: ErrorCode,
    pub msg: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.msg)
    }
}

// Macro to create an error enum with From converters for each input error class
macro_rules! define_errcodes {
    [ $typename:ident => $( $name:ident : $class:ty ),+ ] => {
        #[derive(Debug)]
        pub enum $typename {
            $(
                $name($class),
            )+
        }

        impl fmt::Display for $typename {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                match *self {
                    $(
                        $typename::$name(ref err) => fmt::Display::fmt(err, f),
                    )+
                }
            }
        }

        impl std::error::Error for $typename {}

        $(
            impl From<$class> for $typename {
                fn from(e: $class) -> Self {
                    $typename::$name(e)
                }
            }
        )+
    };
}

define_errcodes![
    LimeError =>
    Usb: rusb::Error,
    Io: std::io::Error,
    Protocol: Status,
    LimeErr: ApiError
];

impl LimeError {
    pub fn new(code: ErrorCode, msg: impl Into<String>) -> Self {
        LimeError::LimeErr(ApiError {
            code,
            msg: msg.into(),
        })
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, msg)
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotSupported, msg)
    }

    pub fn not_connected() -> Self {
        Self::new(ErrorCode::NotConnected, "Device is not connected.")
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Io, msg)
    }

    pub fn out_of_range(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::OutOfRange, msg)
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Interrupted, msg)
    }

    /// errno value for this error.
    pub fn code(&self) -> i32 {
        match self {
            LimeError::Usb(e) => match e {
                rusb::Error::Timeout => ErrorCode::TimedOut as i32,
                rusb::Error::NoDevice | rusb::Error::NotFound => ErrorCode::NoDevice as i32,
                rusb::Error::Busy => ErrorCode::Busy as i32,
                rusb::Error::NotSupported => ErrorCode::NotSupported as i32,
                rusb::Error::InvalidParam => ErrorCode::InvalidArgument as i32,
                _ => ErrorCode::Io as i32,
            },
            LimeError::Io(e) => e.raw_os_error().unwrap_or(ErrorCode::Io as i32),
            LimeError::Protocol(status) => match status {
                Status::Busy | Status::ResourceDenied => ErrorCode::Busy as i32,
                Status::UnknownCommand => ErrorCode::NotSupported as i32,
                _ => ErrorCode::Io as i32,
            },
            LimeError::LimeErr(e) => e.code as i32,
        }
    }
}

struct LastError {
    code: i32,
    msg: CString,
}

thread_local! {
    static LAST_ERROR: RefCell<LastError> = RefCell::new(LastError {
        code: 0,
        msg: CString::default(),
    });
}

/// Record `err` as this thread's last error.
pub fn report_error(err: &LimeError) {
    error!("{}", err);
    let msg = CString::new(err.to_string().replace('\0', " ")).unwrap_or_default();
    LAST_ERROR.with(|last| {
        *last.borrow_mut() = LastError {
            code: err.code(),
            msg,
        }
    });
}

/// errno-style code of the last reported error on this thread, 0 if none.
pub fn last_error() -> i32 {
    LAST_ERROR.with(|last| last.borrow().code)
}

pub fn last_error_message() -> String {
    LAST_ERROR.with(|last| last.borrow().msg.to_string_lossy().into_owned())
}

/// Pointer to the last error message. Valid until the next error is reported
/// on the calling thread.
pub(crate) fn last_error_message_ptr() -> *const std::os::raw::c_char {
    LAST_ERROR.with(|last| last.borrow().msg.as_ptr())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_error_sets_code_and_message() {
        report_error(&LimeError::invalid("Invalid channel number."));
        assert_eq!(last_error(), 22);
        assert_eq!(last_error_message(), "Invalid channel number.");
    }

    #[test]
    fn test_usb_errors_map_to_errno() {
        assert_eq!(LimeError::from(rusb::Error::Timeout).code(), 110);
        assert_eq!(LimeError::from(rusb::Error::Busy).code(), 16);
        assert_eq!(LimeError::from(rusb::Error::Pipe).code(), 5);
    }

    #[test]
    fn test_protocol_status_maps_to_errno() {
        assert_eq!(LimeError::from(Status::Busy).code(), 16);
        assert_eq!(LimeError::from(Status::UnknownCommand).code(), 95);
        assert_eq!(LimeError::from(Status::Error).code(), 5);
    }
}
