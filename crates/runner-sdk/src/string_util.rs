/// String helpers for values that arrive through environment variables.
pub struct StringUtil;

impl StringUtil {
    /// Convert a string to a boolean.
    ///
    /// Valid true values: `"1"`, `"true"`, `"$true"` (case-insensitive).
    /// Valid false values: `"0"`, `"false"`, `"$false"` (case-insensitive).
    /// Returns `None` for unrecognized values.
    pub fn convert_to_bool(value: &str) -> Option<bool> {
        if value.is_empty() {
            return None;
        }
        match value.trim().to_lowercase().as_str() {
            "1" | "true" | "$true" => Some(true),
            "0" | "false" | "$false" => Some(false),
            _ => None,
        }
    }

    /// Split a comma separated list, trimming entries and dropping empty ones.
    pub fn split_list(value: &str) -> Vec<String> {
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_to_bool_values() {
        assert_eq!(StringUtil::convert_to_bool("TRUE"), Some(true));
        assert_eq!(StringUtil::convert_to_bool("1"), Some(true));
        assert_eq!(StringUtil::convert_to_bool("$false"), Some(false));
        assert_eq!(StringUtil::convert_to_bool("yes"), None);
        assert_eq!(StringUtil::convert_to_bool(""), None);
    }

    #[test]
    fn split_list_drops_blanks() {
        assert_eq!(
            StringUtil::split_list("linux, x64,,gpu "),
            vec!["linux", "x64", "gpu"]
        );
        assert!(StringUtil::split_list("").is_empty());
    }
}
