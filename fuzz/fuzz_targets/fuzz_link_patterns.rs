#![no_main]

use libfuzzer_sys::fuzz_target;

use relaymark::negotiate::extract_issued_link;
use relaymark::session::extract_trigger;

fuzz_target!(|data: &str| {
    // Channel posts and agent replies are untrusted text. Both patterns must
    // stay linear-time (libFuzzer flags slow inputs) and only ever return
    // text that actually occurs in the input.
    if let Some(link) = extract_issued_link(data) {
        assert!(data.contains(&link));
        assert!(link.to_ascii_lowercase().starts_with("https://t.me/"));
        assert!(!link.chars().any(char::is_whitespace));
    }

    if let Some(reference) = extract_trigger(data) {
        assert!(!reference.agent_name.is_empty());
        assert!(!reference.agent_name.contains('?'));
        assert!(!reference.agent_name.chars().any(char::is_whitespace));
        assert!(!reference.token.is_empty());
        assert!(!reference.token.chars().any(char::is_whitespace));
        assert!(reference.start_command().starts_with("/start "));
    }
});
