// src/paths/safe_name.rs

/// Maximum length in bytes of one path component on common filesystems.
pub const MAX_COMPONENT_LEN: usize = 255;

const UNSAFE_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*', ';'];

/// Make `name` usable as a single path component.
///
/// Unsafe characters and a leading `.` become `_`, and the result is cut to
/// [`MAX_COMPONENT_LEN`] bytes on a character boundary. Applying it twice
/// gives the same result as applying it once.
pub fn safe_filename(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if UNSAFE_CHARS.contains(&c) { '_' } else { c })
        .collect();

    if out.starts_with('.') {
        out.replace_range(..1, "_");
    }
    if out.is_empty() {
        out.push('_');
    }

    if out.len() > MAX_COMPONENT_LEN {
        let mut cut = MAX_COMPONENT_LEN;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn replaces_every_unsafe_character() {
        assert_eq!(safe_filename(r#"a<b>c:d"e/f\g|h?i*j;k"#), "a_b_c_d_e_f_g_h_i_j_k");
    }

    #[test]
    fn leading_dot_is_replaced() {
        assert_eq!(safe_filename(".hidden"), "_hidden");
        assert_eq!(safe_filename("a.b"), "a.b");
    }

    #[test]
    fn truncates_on_char_boundary() {
        let long = "é".repeat(200);
        let safe = safe_filename(&long);
        assert!(safe.len() <= MAX_COMPONENT_LEN);
        assert_eq!(safe.len(), 254);
    }

    proptest! {
        #[test]
        fn idempotent(name in ".{0,300}") {
            let once = safe_filename(&name);
            prop_assert_eq!(safe_filename(&once), once.clone());
            prop_assert!(once.len() <= MAX_COMPONENT_LEN);
            prop_assert!(!once.contains('/'));
        }
    }
}
