//! RPC Error Types
//!
//! Maps application errors to JSON-RPC error codes.

use jsonrpsee::types::ErrorObjectOwned;
use quill_core::domain::DomainError;
use quill_core::error::AppError;

/// RPC Error Codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const THROTTLED: i32 = 4003;
    pub const INTERNAL_ERROR: i32 = 5000;
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    let code = match &err {
        AppError::Domain(DomainError::NotFound(_)) => code::NOT_FOUND,
        AppError::Domain(DomainError::AlreadyQueued { .. }) => code::CONFLICT,
        AppError::Domain(_) => code::VALIDATION_ERROR,
        AppError::UnknownConnection(_) => code::NOT_FOUND,
        AppError::Identity(_) | AppError::Serialization(_) => code::VALIDATION_ERROR,
        AppError::Generation(_) | AppError::Config(_) | AppError::Internal(_) => {
            code::INTERNAL_ERROR
        }
    };
    ErrorObjectOwned::owned(code, err.to_string(), None::<()>)
}

pub fn throttled() -> ErrorObjectOwned {
    ErrorObjectOwned::owned(
        code::THROTTLED,
        "Rate limit exceeded. Please slow down.",
        None::<()>,
    )
}

pub fn validation(msg: impl Into<String>) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code::VALIDATION_ERROR, msg.into(), None::<()>)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::domain::{Lane, MemberId};

    #[test]
    fn test_error_codes() {
        let not_found = to_rpc_error(DomainError::NotFound(MemberId::new("u1")).into());
        assert_eq!(not_found.code(), code::NOT_FOUND);
        assert!(not_found.message().contains("u1"));

        let conflict = to_rpc_error(
            DomainError::AlreadyQueued {
                member_id: MemberId::new("u1"),
                lane: Lane::Shared,
            }
            .into(),
        );
        assert_eq!(conflict.code(), code::CONFLICT);

        let invalid = to_rpc_error(DomainError::InvalidPayload("title".into()).into());
        assert_eq!(invalid.code(), code::VALIDATION_ERROR);

        let internal = to_rpc_error(AppError::Internal("boom".into()));
        assert_eq!(internal.code(), code::INTERNAL_ERROR);

        assert_eq!(throttled().code(), code::THROTTLED);
    }
}
