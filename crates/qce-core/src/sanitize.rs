/// Characters that never survive into file names.
const FORBIDDEN: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Replace filesystem-hostile characters with `_` and trim whitespace.
///
/// Control characters are stripped too; an empty result becomes "unnamed" so
/// path joins never end up with a bare extension.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if FORBIDDEN.contains(&c) { '_' } else { c })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_forbidden_characters() {
        assert_eq!(sanitize_file_name(r#"a/b\c:d*e?f"g<h>i|j"#), "a_b_c_d_e_f_g_h_i_j");
    }

    #[test]
    fn keeps_unicode_names() {
        assert_eq!(sanitize_file_name("测试群聊 2024"), "测试群聊 2024");
    }

    #[test]
    fn empty_becomes_unnamed() {
        assert_eq!(sanitize_file_name("   "), "unnamed");
        assert_eq!(sanitize_file_name("???"), "___");
    }
}
