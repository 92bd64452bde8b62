use std::fs;
use std::path::Path;

const BUILTIN_TEMPLATE: &str = include_str!("../../templates/filelist.html");
const LIST_MARKER: &str = "<!--filelist_label-->";

/// The listing page, split around the marker line where rows go.
#[derive(Debug, Clone)]
pub struct ListingTemplate {
    before: String,
    after: String,
}

impl Default for ListingTemplate {
    fn default() -> Self {
        Self::from_source(BUILTIN_TEMPLATE)
    }
}

impl ListingTemplate {
    /// Loads `path`, falling back to the built-in page when unset or unreadable.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match fs::read_to_string(path) {
            Ok(source) => Self::from_source(&source),
            Err(e) => {
                tracing::warn!(
                    template = %path.display(),
                    error = %e,
                    "could not read listing template, using built-in"
                );
                Self::default()
            }
        }
    }

    pub fn from_source(source: &str) -> Self {
        let mut before = String::new();
        let mut after = String::new();
        let mut seen_marker = false;

        for line in source.lines() {
            if !seen_marker && line.trim() == LIST_MARKER {
                seen_marker = true;
                continue;
            }
            let part = if seen_marker { &mut after } else { &mut before };
            part.push_str(line);
            part.push('\n');
        }

        Self { before, after }
    }

    pub fn render(&self, names: &[String]) -> String {
        let mut html = self.before.clone();
        for name in names {
            html.push_str(&row(name));
        }
        html.push_str(&self.after);
        html
    }
}

fn row(name: &str) -> String {
    let text = html_escape::encode_text(name);
    let link = urlencoding::encode(name);
    let link = html_escape::encode_double_quoted_attribute(&link);
    format!(
        "            <tr><td class=\"col1\">{text}</td> \
         <td class=\"col2\"><a href=\"/download/{link}\">Download</a></td> \
         <td class=\"col3\"><a href=\"/delete/{link}\" onclick=\"return confirmDelete();\">Delete</a></td></tr>\n"
    )
}
