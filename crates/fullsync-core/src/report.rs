//! Formatting of partial bulk failures.

use crate::backend::{BulkItem, Labels};
use std::fmt::Write;

/// Build the error message for documents the backend rejected.
///
/// ```text
/// The following Posts failed to index:
///
/// - 12 (Post):
/// [mapper_parsing_exception] failed to parse field [date]
/// ```
///
/// Items without an error are ignored.
pub fn format_bulk_failures(labels: &Labels, failed: &[&BulkItem]) -> String {
    let mut out = format!("The following {} failed to index:\n\n", labels.plural);

    for item in failed {
        let Some(error) = &item.error else {
            continue;
        };
        let _ = writeln!(out, "- {} ({}):", item.id, labels.singular);
        let _ = writeln!(out, "[{}] {}", error.kind, error.reason);
    }

    out.truncate(out.trim_end().len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bulk_failures() {
        let labels = Labels::new("Post", "Posts");
        let a = BulkItem::failed("12", "mapper_parsing_exception", "failed to parse field [date]");
        let b = BulkItem::ok("13");
        let c = BulkItem::failed("14", "illegal_argument_exception", "too many fields");

        let text = format_bulk_failures(&labels, &[&a, &b, &c]);
        assert_eq!(
            text,
            "The following Posts failed to index:\n\n\
             - 12 (Post):\n\
             [mapper_parsing_exception] failed to parse field [date]\n\
             - 14 (Post):\n\
             [illegal_argument_exception] too many fields"
        );
    }
}
