//! Response shapes of the identity endpoints.

use serde::{Deserialize, Serialize};

/// Standard backend envelope: `{"error": bool, "msg": string|null, "data": ...}`
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub msg: Option<String>,
    pub data: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SignInResponse {
    pub tokens: SignInTokens,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SignInTokens {
    pub access: String,
    #[serde(default)]
    pub refresh: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TunnelLoginData {
    pub token: String,
}

pub const ADMIN_ROLE: &str = "admin";

/// The signed-in user as reported by `/auth/me`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: Option<i64>,
    #[serde(default)]
    pub email: String,
    #[serde(default = "default_role")]
    pub user_role: String,
    #[serde(default)]
    pub allowed_menus: Vec<String>,
}

fn default_role() -> String {
    "user".to_string()
}

impl UserInfo {
    pub fn is_admin(&self) -> bool {
        self.user_role == ADMIN_ROLE
    }

    pub fn can_see_menu(&self, path: &str) -> bool {
        self.allowed_menus.iter().any(|m| m == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_auth_me() {
        let json = r#"{"error":false,"msg":null,"data":{"id":1,"email":"admin@redock.local","user_status":1,"user_role":"admin","allowed_menus":["/tunnel-proxy-client","/local-proxy"]}}"#;
        let envelope: Envelope<UserInfo> = serde_json::from_str(json).expect("parse");
        let user = envelope.data.expect("data");
        assert!(user.is_admin());
        assert!(user.can_see_menu("/local-proxy"));
        assert!(!user.can_see_menu("/exec"));
    }

    #[test]
    fn test_user_defaults() {
        let user: UserInfo = serde_json::from_str(r#"{"id":7}"#).expect("parse");
        assert_eq!(user.user_role, "user");
        assert!(!user.is_admin());
        assert!(user.allowed_menus.is_empty());
    }
}
