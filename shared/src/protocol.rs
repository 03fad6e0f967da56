/// Persisted key holding the access token half of a credential.
pub const TOKEN_KEY: &str = "access_token";

/// Persisted key holding the identity half of a credential.
pub const IDENTITY_KEY: &str = "user_id";

/// Query parameter carrying the token on the federated login callback.
pub const CALLBACK_TOKEN_PARAM: &str = "token";

/// Query parameter carrying the identity on the federated login callback.
pub const CALLBACK_IDENTITY_PARAM: &str = "user_id";
