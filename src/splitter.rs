//! Splits a Lean 4 snippet into its cacheable preamble ("header") and the
//! remainder ("body"). See SPEC_FULL.md §4.1.

/// Preamble directives whose lines belong to the header. Matched on the first
/// non-whitespace token of a line, after stripping leading whitespace.
const HEADER_DIRECTIVES: &[&str] = &[
    "import",
    "open",
    "set_option",
    "namespace",
    "section",
    "universe",
    "variable",
];

/// Splits `code` into `(header, body)` such that `header + body == code`.
///
/// `header` is the maximal prefix of whole lines that are either blank or
/// start (after leading whitespace) with one of [`HEADER_DIRECTIVES`]. The
/// split is purely lexical — it never parses Lean syntax, so a directive
/// keyword appearing inside a string literal or comment at the start of a
/// line is still treated as a header line.
pub fn split(code: &str) -> (&str, &str) {
    let mut offset = 0;
    let mut rest = code;

    loop {
        let line_end = rest.find('\n').map(|i| i + 1).unwrap_or(rest.len());
        let line = &rest[..line_end];
        let trimmed = line.trim_start();

        if trimmed.is_empty() || is_header_line(trimmed) {
            offset += line_end;
            rest = &code[offset..];
            if line_end == 0 {
                break;
            }
            continue;
        }
        break;
    }

    (&code[..offset], &code[offset..])
}

fn is_header_line(trimmed: &str) -> bool {
    HEADER_DIRECTIVES.iter().any(|directive| {
        trimmed
            .strip_prefix(directive)
            .is_some_and(|rest| rest.is_empty() || !is_ident_continue(rest.as_bytes()[0]))
    })
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'\''
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_splits_to_empty() {
        assert_eq!(split(""), ("", ""));
    }

    #[test]
    fn no_preamble_yields_empty_header() {
        let code = "#check Nat";
        assert_eq!(split(code), ("", "#check Nat"));
    }

    #[test]
    fn entire_snippet_is_preamble() {
        let code = "import Mathlib\nopen Nat\n";
        assert_eq!(split(code), (code, ""));
    }

    #[test]
    fn header_and_body_concatenate_to_input() {
        let code = "import Mathlib\nopen Nat\n\ndef f := 1\n#check f\n";
        let (header, body) = split(code);
        assert_eq!(format!("{header}{body}"), code);
        assert_eq!(header, "import Mathlib\nopen Nat\n\n");
        assert_eq!(body, "def f := 1\n#check f\n");
    }

    #[test]
    fn blank_only_header_is_treated_as_empty_prefix_but_still_consumed() {
        // Leading blank lines are preamble (whitespace-only lines), so they
        // become part of the header even with no directives.
        let code = "\n\n#check Nat";
        let (header, body) = split(code);
        assert_eq!(header, "\n\n");
        assert_eq!(body, "#check Nat");
    }

    #[test]
    fn directive_like_identifier_is_not_mistaken_for_a_directive() {
        // `imports_helper` is not the `import` directive — it's a body line.
        let code = "def imports_helper := 1\n";
        assert_eq!(split(code), ("", code));
    }

    #[test]
    fn indented_directive_counts_as_header() {
        let code = "  open Nat\ndef f := 1\n";
        let (header, body) = split(code);
        assert_eq!(header, "  open Nat\n");
        assert_eq!(body, "def f := 1\n");
    }

    #[test]
    fn trailing_whitespace_after_last_header_line_stays_in_header() {
        let code = "import Mathlib   \ndef f := 1\n";
        let (header, body) = split(code);
        assert_eq!(header, "import Mathlib   \n");
        assert_eq!(body, "def f := 1\n");
    }

    #[test]
    fn unterminated_final_line_is_handled() {
        let code = "import Mathlib\ndef f := 1";
        let (header, body) = split(code);
        assert_eq!(header, "import Mathlib\n");
        assert_eq!(body, "def f := 1");
    }
}
