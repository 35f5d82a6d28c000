//! Mobile wallet routing by phone-number prefix

use super::Channel;

/// Picks the wallet sub-provider that serves a phone number.
#[derive(Clone, Debug, Default)]
pub struct WalletRouter { primary: Vec<String>, secondary: Vec<String> }

impl WalletRouter {
    pub fn new(primary: Vec<String>, secondary: Vec<String>) -> Self {
        let clean = |v: Vec<String>| v.into_iter().map(|p| digits(&p)).filter(|p| !p.is_empty()).collect();
        Self { primary: clean(primary), secondary: clean(secondary) }
    }

    /// Longest matching prefix wins, so "0999" can be carved out of "099".
    pub fn route(&self, phone: &str) -> Option<Channel> {
        let number = digits(phone);
        if number.is_empty() { return None; }
        let best = |prefixes: &[String]| prefixes.iter().filter(|p| number.starts_with(p.as_str())).map(|p| p.len()).max();
        match (best(&self.primary), best(&self.secondary)) {
            (Some(a), Some(b)) if b > a => Some(Channel::WalletSecondary),
            (Some(_), _) => Some(Channel::WalletPrimary),
            (None, Some(_)) => Some(Channel::WalletSecondary),
            (None, None) => None,
        }
    }
}

fn digits(s: &str) -> String { s.chars().filter(char::is_ascii_digit).collect() }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_by_prefix_ignoring_formatting() {
        let router = WalletRouter::new(vec!["099".into(), "+265 99".into()], vec!["088".into()]);
        assert_eq!(router.route("099 123 4567"), Some(Channel::WalletPrimary));
        assert_eq!(router.route("+265-991-234-567"), Some(Channel::WalletPrimary));
        assert_eq!(router.route("0881234567"), Some(Channel::WalletSecondary));
        assert_eq!(router.route("0771234567"), None);
        assert_eq!(router.route(""), None);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let router = WalletRouter::new(vec!["09".into()], vec!["0999".into()]);
        assert_eq!(router.route("0999111222"), Some(Channel::WalletSecondary));
        assert_eq!(router.route("0981111222"), Some(Channel::WalletPrimary));
    }
}
