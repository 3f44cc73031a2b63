//! AMQP topic binding semantics.
//!
//! A binding key is a dot-separated list of words where `*` matches exactly
//! one word and `#` matches zero or more words.

/// Whether `routing_key` would be delivered to a queue bound with `binding`.
pub fn binding_matches(binding: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = binding.split('.').collect();
    let words: Vec<&str> = routing_key.split('.').collect();
    matches_words(&pattern, &words)
}

fn matches_words(pattern: &[&str], words: &[&str]) -> bool {
    match pattern.split_first() {
        None => words.is_empty(),
        Some((&"#", rest)) => (0..=words.len()).any(|skip| matches_words(rest, &words[skip..])),
        Some((&head, rest)) => match words.split_first() {
            Some((word, remaining)) if head == "*" || head == *word => {
                matches_words(rest, remaining)
            }
            _ => false,
        },
    }
}
