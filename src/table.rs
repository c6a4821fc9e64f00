use std::{borrow::Cow, fmt::Write as _};

const DEFAULT_MAX_CELL_WIDTH: usize = 48;

#[derive(Debug, Clone)]
pub struct TextTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    max_cell_width: usize,
}

impl TextTable {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
            max_cell_width: DEFAULT_MAX_CELL_WIDTH,
        }
    }

    pub fn with_max_cell_width(mut self, width: usize) -> Self {
        self.max_cell_width = width.max(4);
        self
    }

    pub fn push_row<I, S>(&mut self, cells: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut row = cells.into_iter().map(Into::into).collect::<Vec<String>>();
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn render(&self) -> String {
        let header = fit_cells(&self.headers, self.max_cell_width);
        let body = self
            .rows
            .iter()
            .map(|row| fit_cells(row, self.max_cell_width))
            .collect::<Vec<_>>();

        let mut widths = header.iter().map(|h| display_width(h).max(3)).collect::<Vec<_>>();
        for row in &body {
            for (idx, cell) in row.iter().enumerate() {
                widths[idx] = widths[idx].max(display_width(cell));
            }
        }

        let mut output = String::new();
        let _ = writeln!(output, "{}", format_row(&header, &widths));
        let separator = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
        let _ = writeln!(output, "{}", format_row(&separator, &widths));
        for row in &body {
            let _ = writeln!(output, "{}", format_row(row, &widths));
        }
        output
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }
}

fn fit_cells(row: &[String], max_width: usize) -> Vec<Cow<'_, str>> {
    row.iter().map(|cell| fit_cell(cell, max_width)).collect()
}

fn format_row<S: AsRef<str>>(values: &[S], widths: &[usize]) -> String {
    let mut line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| {
            let value = value.as_ref();
            let padding = width.saturating_sub(display_width(value));
            format!("{value}{}", " ".repeat(padding))
        })
        .collect::<Vec<_>>()
        .join("  ");
    line.truncate(line.trim_end().len());
    line
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}

fn fit_cell(value: &str, max: usize) -> Cow<'_, str> {
    let flattened = if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    };
    if display_width(&flattened) <= max {
        return flattened;
    }
    let mut shortened = flattened.chars().take(max - 3).collect::<String>();
    shortened.push_str("...");
    Cow::Owned(shortened)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_are_aligned_and_trailing_space_trimmed() {
        let mut table = TextTable::new(["column", "kind"]);
        table.push_row(["Status", "singleChoice"]);
        table.push_row(["Amount"]);
        let rendered = table.render();
        let lines = rendered.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "column  kind");
        assert_eq!(lines[1], "------  ------------");
        assert_eq!(lines[2], "Status  singleChoice");
        assert_eq!(lines[3], "Amount");
    }

    #[test]
    fn long_and_multiline_cells_are_flattened() {
        let mut table = TextTable::new(["note"]).with_max_cell_width(10);
        table.push_row(["line one\nline two"]);
        let rendered = table.render();
        assert!(rendered.lines().nth(2).unwrap().starts_with("line on..."));
    }
}
