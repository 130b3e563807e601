/// Message types carried in the packet header. Requests arrive from clients;
/// each has a matching response variant, plus a generic error reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    RegisterRequest = 1,
    RegisterResponse = 2,
    LoginRequest = 3,
    LoginResponse = 4,
    ValidateTokenRequest = 5,
    ValidateTokenResponse = 6,
    LogoutRequest = 7,
    LogoutResponse = 8,
    ChangePasswordRequest = 9,
    ChangePasswordResponse = 10,
    Error = 255,
}

impl MessageType {
    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(Self::RegisterRequest),
            2 => Some(Self::RegisterResponse),
            3 => Some(Self::LoginRequest),
            4 => Some(Self::LoginResponse),
            5 => Some(Self::ValidateTokenRequest),
            6 => Some(Self::ValidateTokenResponse),
            7 => Some(Self::LogoutRequest),
            8 => Some(Self::LogoutResponse),
            9 => Some(Self::ChangePasswordRequest),
            10 => Some(Self::ChangePasswordResponse),
            255 => Some(Self::Error),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::RegisterRequest => "RegisterRequest",
            Self::RegisterResponse => "RegisterResponse",
            Self::LoginRequest => "LoginRequest",
            Self::LoginResponse => "LoginResponse",
            Self::ValidateTokenRequest => "ValidateTokenRequest",
            Self::ValidateTokenResponse => "ValidateTokenResponse",
            Self::LogoutRequest => "LogoutRequest",
            Self::LogoutResponse => "LogoutResponse",
            Self::ChangePasswordRequest => "ChangePasswordRequest",
            Self::ChangePasswordResponse => "ChangePasswordResponse",
            Self::Error => "Error",
        }
    }
}

/// Result codes carried in response payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthResult {
    Success = 0,
    InvalidCredentials = 1,
    UsernameTaken = 2,
    InvalidUsername = 3,
    PasswordTooShort = 4,
    AccountBanned = 5,
    TokenInvalid = 6,
    TokenExpired = 7,
    RateLimited = 8,
    ServerError = 9,
}

impl AuthResult {
    pub fn name(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::InvalidCredentials => "InvalidCredentials",
            Self::UsernameTaken => "UsernameTaken",
            Self::InvalidUsername => "InvalidUsername",
            Self::PasswordTooShort => "PasswordTooShort",
            Self::AccountBanned => "AccountBanned",
            Self::TokenInvalid => "TokenInvalid",
            Self::TokenExpired => "TokenExpired",
            Self::RateLimited => "RateLimited",
            Self::ServerError => "ServerError",
        }
    }
}

/// Registration request: username, the client's SHA-256 password digest, and
/// an optional email.
#[derive(Debug, Clone, Default)]
pub struct RegisterRequest {
    pub username: String,
    pub password_hash: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct ValidateTokenRequest {
    pub session_token: String,
    /// IP the consuming service observed; informational.
    pub ip_address: String,
}

#[derive(Debug, Clone)]
pub struct LogoutRequest {
    pub session_token: String,
    pub logout_all_sessions: bool,
}

#[derive(Debug, Clone)]
pub struct ChangePasswordRequest {
    pub session_token: String,
    pub old_password_hash: String,
    pub new_password_hash: String,
}

/// A decoded request payload, tagged by message type.
#[derive(Debug, Clone)]
pub enum Request {
    Register(RegisterRequest),
    Login(LoginRequest),
    ValidateToken(ValidateTokenRequest),
    Logout(LogoutRequest),
    ChangePassword(ChangePasswordRequest),
}

#[derive(Debug, Clone)]
pub struct RegisterResponse {
    pub result: AuthResult,
    pub account_id: u64,
    pub session_token: String,
}

#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub result: AuthResult,
    /// Reserved; always 0 until 2FA lands.
    pub requires_2fa: bool,
    pub account_id: u64,
    pub session_token: String,
}

#[derive(Debug, Clone)]
pub struct ValidateTokenResponse {
    pub result: AuthResult,
    /// Set when the owning account has an active ban; consumers must treat
    /// the session as denied even though the result is `Success`.
    pub is_banned: bool,
    pub account_id: u64,
    pub expires_at: u64,
    pub error_message: String,
}

#[derive(Debug, Clone)]
pub struct LogoutResponse {
    pub result: AuthResult,
    pub sessions_invalidated: u32,
}

#[derive(Debug, Clone)]
pub struct ChangePasswordResponse {
    pub result: AuthResult,
    pub sessions_invalidated: u32,
}

#[derive(Debug, Clone)]
pub struct ErrorResponse {
    pub error_code: AuthResult,
    pub message: String,
}

/// A response payload, tagged by message type. Every handled request
/// produces exactly one of these.
#[derive(Debug, Clone)]
pub enum Response {
    Register(RegisterResponse),
    Login(LoginResponse),
    ValidateToken(ValidateTokenResponse),
    Logout(LogoutResponse),
    ChangePassword(ChangePasswordResponse),
    Error(ErrorResponse),
}

impl Response {
    pub fn message_type(&self) -> MessageType {
        match self {
            Response::Register(_) => MessageType::RegisterResponse,
            Response::Login(_) => MessageType::LoginResponse,
            Response::ValidateToken(_) => MessageType::ValidateTokenResponse,
            Response::Logout(_) => MessageType::LogoutResponse,
            Response::ChangePassword(_) => MessageType::ChangePasswordResponse,
            Response::Error(_) => MessageType::Error,
        }
    }

    /// Convenience constructor for the generic error reply.
    pub fn error(code: AuthResult, message: impl Into<String>) -> Self {
        Response::Error(ErrorResponse {
            error_code: code,
            message: message.into(),
        })
    }
}
