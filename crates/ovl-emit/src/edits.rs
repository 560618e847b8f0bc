//! Line-addressed source edits.

use std::collections::BTreeMap;

#[derive(Clone, Debug, Default)]
struct LineEdits {
    remove: bool,
    before: Vec<String>,
    replace: Vec<String>,
    after: Vec<String>,
}

/// Pending edits to the lines of one source unit.
///
/// Edits are only recorded until [`EditList::apply`]. For each line the
/// output is: all `before` text, then either the `replace` text or the line
/// itself (unless removed), then all `after` text. Text from several edits
/// on the same line keeps insertion order. Multi-line text is split on
/// newlines. The result ends with a `.data` section holding the data
/// appends.
#[derive(Clone, Debug, Default)]
pub struct EditList {
    lines: BTreeMap<usize, LineEdits>,
    data: Vec<String>,
}

impl EditList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `code` before `line`.
    pub fn before(&mut self, line: usize, code: impl Into<String>) {
        self.lines.entry(line).or_default().before.push(code.into());
    }

    /// Insert `code` after `line`.
    pub fn after(&mut self, line: usize, code: impl Into<String>) {
        self.lines.entry(line).or_default().after.push(code.into());
    }

    /// Emit `code` in place of `line`.
    pub fn replace(&mut self, line: usize, code: impl Into<String>) {
        self.lines.entry(line).or_default().replace.push(code.into());
    }

    /// Drop `line`. Insertions around it are kept.
    pub fn remove(&mut self, line: usize) {
        self.lines.entry(line).or_default().remove = true;
    }

    /// Append `code` to the trailing data section.
    pub fn data(&mut self, code: impl Into<String>) {
        self.data.push(code.into());
    }

    /// Move all edits of `other` after the edits already recorded.
    pub fn append(&mut self, other: Self) {
        for (line, edits) in other.lines {
            let entry = self.lines.entry(line).or_default();
            entry.remove |= edits.remove;
            entry.before.extend(edits.before);
            entry.replace.extend(edits.replace);
            entry.after.extend(edits.after);
        }
        self.data.extend(other.data);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.data.is_empty()
    }

    /// Produce the edited text.
    #[must_use]
    pub fn apply<S: AsRef<str>>(&self, lines: &[S]) -> Vec<String> {
        let mut out = Vec::with_capacity(lines.len());
        let split = |out: &mut Vec<String>, code: &[String]| {
            for text in code {
                out.extend(text.split('\n').map(str::to_string));
            }
        };

        for (index, line) in lines.iter().enumerate() {
            let Some(edits) = self.lines.get(&index) else {
                out.push(line.as_ref().to_string());
                continue;
            };
            split(&mut out, &edits.before);
            if edits.replace.is_empty() {
                if !edits.remove {
                    out.push(line.as_ref().to_string());
                }
            } else {
                split(&mut out, &edits.replace);
            }
            split(&mut out, &edits.after);
        }

        out.push(".data".to_string());
        split(&mut out, &self.data);
        out
    }
}
