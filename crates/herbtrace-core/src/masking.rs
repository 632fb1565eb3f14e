// crates/herbtrace-core/src/masking.rs

const MASK_TOKEN: &str = "***";

/// Masks a collector id for public provenance views: first two characters,
/// the mask token, last character. Ids of three or fewer characters mask
/// entirely, since head and tail would otherwise cover the whole id.
pub fn mask_collector_id(collector_id: &str) -> String {
    let chars: Vec<char> = collector_id.chars().collect();
    if chars.len() <= 3 {
        return MASK_TOKEN.to_string();
    }
    let head: String = chars[..2].iter().collect();
    let tail = chars[chars.len() - 1];
    format!("{head}{MASK_TOKEN}{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_middle_of_id() {
        assert_eq!(mask_collector_id("farmer-123"), "fa***3");
        assert_eq!(mask_collector_id("abcd"), "ab***d");
    }

    #[test]
    fn short_ids_mask_entirely() {
        assert_eq!(mask_collector_id("abc"), "***");
        assert_eq!(mask_collector_id("a"), "***");
        assert_eq!(mask_collector_id(""), "***");
    }
}
