//! Guards against LDAP injection. Values are refused rather than escaped.

const FILTER_BAD_CHARACTERS: &str = "\x00()*\\";
const DN_BAD_CHARACTERS: &str = "\x00()*\\,='\"#+;<>";

fn contains_any(value: &str, characters: &str) -> bool {
    value.chars().any(|c| characters.contains(c))
}

/// Substitute `username` into a search filter template.
pub fn user_filter(template: &str, username: &str) -> Option<String> {
    if contains_any(username, FILTER_BAD_CHARACTERS) {
        return None;
    }
    Some(template.replace("%s", username))
}

/// Substitute `username` into a DN template.
pub fn user_dn(template: &str, username: &str) -> Option<String> {
    if contains_any(username, DN_BAD_CHARACTERS) {
        return None;
    }
    Some(template.replace("%s", username))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_rejects_every_metacharacter() {
        for bad in ["\x00", "(", ")", "*", "\\"] {
            for username in [
                bad.to_string(),
                format!("alice{bad}"),
                format!("{bad}alice"),
                format!("al{bad}ice"),
            ] {
                assert_eq!(
                    user_filter("(uid=%s)", &username),
                    None,
                    "{username:?} must be rejected"
                );
            }
        }
    }

    #[test]
    fn test_filter_substitutes_clean_name() {
        assert_eq!(
            user_filter("(&(objectClass=person)(uid=%s))", "alice.smith"),
            Some("(&(objectClass=person)(uid=alice.smith))".to_string())
        );
    }

    #[test]
    fn test_dn_rejects_separators() {
        assert_eq!(user_dn("uid=%s,ou=people", "alice,ou=admins"), None);
        assert_eq!(user_dn("uid=%s,ou=people", "a=b"), None);
        assert_eq!(user_dn("uid=%s,ou=people", "a+b"), None);
        assert_eq!(
            user_dn("uid=%s,ou=people,dc=example", "alice"),
            Some("uid=alice,ou=people,dc=example".to_string())
        );
    }
}
