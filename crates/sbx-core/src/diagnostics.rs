//! Stable diagnostic codes carried in error messages and details.

pub mod build {
    pub const INVALID_SPECIFICATION: &str = "SBX100";
    pub const CONTENT_UNREADABLE: &str = "SBX110";
    pub const ARCHIVE_CREATION_FAILED: &str = "SBX111";
    pub const UPLOAD_LINK_FAILED: &str = "SBX120";
    pub const TRANSFER_FAILED: &str = "SBX121";
    pub const SUBMISSION_FAILED: &str = "SBX130";
    pub const BUILD_FAILED: &str = "SBX140";
    pub const STATUS_CHECK_FAILED: &str = "SBX141";
    pub const CANCELLED: &str = "SBX199";
}

pub mod auth {
    pub const TOKEN_UNAVAILABLE: &str = "SBX200";
}

pub mod sandbox {
    pub const REQUEST_FAILED: &str = "SBX300";
    pub const MISSING_API_KEY: &str = "SBX301";
    pub const INVALID_CONFIG: &str = "SBX302";
}
