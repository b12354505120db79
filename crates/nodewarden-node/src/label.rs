//! The `"Name [Device]"` client-label convention.
//!
//! A label is a display name optionally followed by one bracketed device
//! tag; the closing bracket must be the final non-whitespace character and
//! the device is the content of the last balanced bracket group, so names
//! containing literal brackets stay intact. A label that is nothing but a
//! bracket group is treated as a plain name.

/// Split a raw label into `(display name, optional device)`.
pub fn split_label(raw: &str) -> (String, Option<String>) {
    let trimmed = raw.trim();

    if trimmed.ends_with(']')
        && let Some(open) = trimmed.rfind('[')
    {
        let base = trimmed[..open].trim();
        let device = trimmed[open + 1..trimmed.len() - 1].trim();
        if !base.is_empty() && !device.is_empty() {
            return (base.to_string(), Some(device.to_string()));
        }
    }

    (trimmed.to_string(), None)
}

/// Inverse of [`split_label`].
pub fn join_label(name: &str, device: Option<&str>) -> String {
    match device.map(str::trim).filter(|d| !d.is_empty()) {
        Some(device) => format!("{name} [{device}]"),
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("Alice", "Alice", None; "plain name")]
    #[test_case("Alice [Phone]", "Alice", Some("Phone"); "name with device")]
    #[test_case("  Alice  [Phone]  ", "Alice", Some("Phone"); "whitespace trimmed")]
    #[test_case("We[i]rd [Tablet]", "We[i]rd", Some("Tablet"); "bracket inside name")]
    #[test_case("[Tablet]", "[Tablet]", None; "bracket group alone stays a name")]
    #[test_case("Alice []", "Alice []", None; "empty device ignored")]
    #[test_case("Alice [Phone] extra", "Alice [Phone] extra", None; "bracket not trailing")]
    fn splitting(raw: &str, name: &str, device: Option<&str>) {
        assert_eq!(split_label(raw), (name.to_string(), device.map(String::from)));
    }

    #[test_case("Alice", Some("Phone"), "Alice [Phone]"; "with device")]
    #[test_case("Alice", None, "Alice"; "without device")]
    #[test_case("Alice", Some("  "), "Alice"; "blank device dropped")]
    fn joining(name: &str, device: Option<&str>, expected: &str) {
        assert_eq!(join_label(name, device), expected);
    }

    #[test]
    fn join_then_split_round_trips() {
        let joined = join_label("Alice", Some("Phone"));
        assert_eq!(split_label(&joined), ("Alice".to_string(), Some("Phone".to_string())));
    }
}
