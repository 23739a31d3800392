//! MTP response codes.

use serde::{Deserialize, Serialize};

/// Response codes a device may answer an operation with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum ResponseCode {
    /// Operation completed
    Ok = 0x2001,
    /// General error
    GeneralError = 0x2002,
    /// No session open on the device
    SessionNotOpen = 0x2003,
    /// Operation not supported
    OperationNotSupported = 0x2005,
    /// Transfer aborted midway
    IncompleteTransfer = 0x2007,
    /// Unknown storage id
    InvalidStorageId = 0x2008,
    /// Unknown object handle
    InvalidObjectHandle = 0x2009,
    /// Storage is full
    StoreFull = 0x200C,
    /// Object is write protected
    ObjectWriteProtected = 0x200D,
    /// Storage is read-only
    StoreReadOnly = 0x200E,
    /// Access denied
    AccessDenied = 0x200F,
    /// Only part of the objects were deleted
    PartialDeletion = 0x2012,
    /// Storage not available
    StoreNotAvailable = 0x2013,
    /// Device busy
    DeviceBusy = 0x2019,
    /// Unknown parent object
    InvalidParentObject = 0x201A,
    /// Invalid parameter
    InvalidParameter = 0x201D,
    /// Session already open
    SessionAlreadyOpen = 0x201E,
    /// Transaction cancelled
    TransactionCancelled = 0x201F,
    /// Unrecognised code
    Unknown = 0xFFFF,
}

impl From<u16> for ResponseCode {
    fn from(code: u16) -> Self {
        match code {
            0x2001 => ResponseCode::Ok,
            0x2002 => ResponseCode::GeneralError,
            0x2003 => ResponseCode::SessionNotOpen,
            0x2005 => ResponseCode::OperationNotSupported,
            0x2007 => ResponseCode::IncompleteTransfer,
            0x2008 => ResponseCode::InvalidStorageId,
            0x2009 => ResponseCode::InvalidObjectHandle,
            0x200C => ResponseCode::StoreFull,
            0x200D => ResponseCode::ObjectWriteProtected,
            0x200E => ResponseCode::StoreReadOnly,
            0x200F => ResponseCode::AccessDenied,
            0x2012 => ResponseCode::PartialDeletion,
            0x2013 => ResponseCode::StoreNotAvailable,
            0x2019 => ResponseCode::DeviceBusy,
            0x201A => ResponseCode::InvalidParentObject,
            0x201D => ResponseCode::InvalidParameter,
            0x201E => ResponseCode::SessionAlreadyOpen,
            0x201F => ResponseCode::TransactionCancelled,
            _ => ResponseCode::Unknown,
        }
    }
}

impl ResponseCode {
    /// Get human-readable description of the response.
    pub fn description(&self) -> &'static str {
        match self {
            ResponseCode::Ok => "OK",
            ResponseCode::GeneralError => "General error",
            ResponseCode::SessionNotOpen => "Session not open",
            ResponseCode::OperationNotSupported => "Operation not supported",
            ResponseCode::IncompleteTransfer => "Incomplete transfer",
            ResponseCode::InvalidStorageId => "Invalid storage id",
            ResponseCode::InvalidObjectHandle => "Invalid object handle",
            ResponseCode::StoreFull => "Store full",
            ResponseCode::ObjectWriteProtected => "Object write protected",
            ResponseCode::StoreReadOnly => "Store read-only",
            ResponseCode::AccessDenied => "Access denied",
            ResponseCode::PartialDeletion => "Partial deletion",
            ResponseCode::StoreNotAvailable => "Store not available",
            ResponseCode::DeviceBusy => "Device busy",
            ResponseCode::InvalidParentObject => "Invalid parent object",
            ResponseCode::InvalidParameter => "Invalid parameter",
            ResponseCode::SessionAlreadyOpen => "Session already open",
            ResponseCode::TransactionCancelled => "Transaction cancelled",
            ResponseCode::Unknown => "Unknown response",
        }
    }

    /// Responses that may succeed when the operation is repeated later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResponseCode::DeviceBusy
                | ResponseCode::IncompleteTransfer
                | ResponseCode::TransactionCancelled
                | ResponseCode::StoreNotAvailable
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_code_conversion() {
        assert_eq!(ResponseCode::from(0x2001), ResponseCode::Ok);
        assert_eq!(ResponseCode::from(0x2002), ResponseCode::GeneralError);
        assert_eq!(ResponseCode::from(0x2009), ResponseCode::InvalidObjectHandle);
        assert_eq!(ResponseCode::from(0x200C), ResponseCode::StoreFull);
        assert_eq!(ResponseCode::from(0x2019), ResponseCode::DeviceBusy);
        assert_eq!(ResponseCode::from(0x201A), ResponseCode::InvalidParentObject);

        // Codes outside the table
        assert_eq!(ResponseCode::from(0x0000), ResponseCode::Unknown);
        assert_eq!(ResponseCode::from(0xA801), ResponseCode::Unknown);
    }

    #[test]
    fn test_response_code_round_trips_through_repr() {
        for code in [
            ResponseCode::SessionNotOpen,
            ResponseCode::InvalidStorageId,
            ResponseCode::PartialDeletion,
            ResponseCode::TransactionCancelled,
        ] {
            assert_eq!(ResponseCode::from(code as u16), code);
        }
    }

    #[test]
    fn test_response_code_descriptions() {
        assert_eq!(ResponseCode::Ok.description(), "OK");
        assert_eq!(
            ResponseCode::InvalidObjectHandle.description(),
            "Invalid object handle"
        );
        assert_eq!(ResponseCode::DeviceBusy.description(), "Device busy");
        assert_eq!(ResponseCode::Unknown.description(), "Unknown response");
    }

    #[test]
    fn test_transient_codes() {
        assert!(ResponseCode::DeviceBusy.is_transient());
        assert!(!ResponseCode::AccessDenied.is_transient());
        assert!(!ResponseCode::InvalidObjectHandle.is_transient());
    }
}
