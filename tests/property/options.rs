//! Property tests for broker URI handling.
//!
//! Invariants tested:
//! - Rendering then parsing restores every field, whatever the credentials
//! - Non-amqp schemes are rejected

use amqp_resilience_core::{ConnectionOptions, OptionsError};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: credentials and vhost survive percent-encoding
    #[test]
    fn uri_preserves_options(
        secure in any::<bool>(),
        hostname in "[a-z][a-z0-9.-]{0,20}",
        port in 1u16..,
        username in ".{0,16}",
        password in ".{0,16}",
        vhost in ".{1,16}",
    ) {
        let options = ConnectionOptions {
            protocol: if secure { "amqps" } else { "amqp" }.to_string(),
            hostname,
            port,
            username,
            password,
            vhost,
        };

        let parsed = ConnectionOptions::from_uri(&options.uri()).unwrap();
        prop_assert_eq!(parsed, options);
    }

    /// Property: only amqp and amqps are accepted
    #[test]
    fn unknown_scheme_is_rejected(scheme in "[a-z]{1,8}") {
        prop_assume!(scheme != "amqp" && scheme != "amqps");
        let result = ConnectionOptions::from_uri(&format!("{}://localhost", scheme));
        prop_assert!(matches!(result, Err(OptionsError::UnsupportedScheme(_))));
    }
}
