use serde::{Deserialize, Serialize};

/// Identity needed to open a session: `{id, name, accessToken}`.
///
/// Never mutated once issued; renewal produces a new bundle.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBundle {
    pub id: String,
    pub name: String,
    #[serde(rename = "accessToken")]
    pub access_token: String,
}

impl CredentialBundle {
    pub fn new(id: impl Into<String>, name: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            access_token: access_token.into(),
        }
    }
}

impl std::fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Username/password pair for the last-resort authenticate call.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AccountCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Body shared by the refresh and authenticate responses.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub selected_profile: SelectedProfile,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectedProfile {
    pub id: String,
    pub name: String,
}

impl From<AuthResponse> for CredentialBundle {
    fn from(res: AuthResponse) -> Self {
        CredentialBundle {
            id: res.selected_profile.id,
            name: res.selected_profile.name,
            access_token: res.access_token,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_json_layout() {
        let bundle = CredentialBundle::new("abc", "Bot", "token");
        let json = serde_json::to_value(&bundle).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "id": "abc", "name": "Bot", "accessToken": "token" })
        );
    }

    #[test]
    fn test_auth_response_into_bundle() {
        let res: AuthResponse = serde_json::from_str(
            r#"{"accessToken":"t2","clientToken":"c","selectedProfile":{"id":"abc","name":"Bot"}}"#,
        )
        .unwrap();
        assert_eq!(CredentialBundle::from(res), CredentialBundle::new("abc", "Bot", "t2"));
    }

    #[test]
    fn test_secrets_stay_out_of_debug_output() {
        let bundle = CredentialBundle::new("abc", "Bot", "very-secret-token");
        assert!(!format!("{:?}", bundle).contains("very-secret-token"));
        let account = AccountCredentials {
            username: String::from("bot@example.org"),
            password: String::from("hunter2"),
        };
        assert!(!format!("{:?}", account).contains("hunter2"));
    }
}
