// urraca is a deduplicating, content-addressed snapshot engine
// Copyright (C) 2025  Javier Lancha Vázquez <javier.lancha@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Right,
}

enum Row {
    Cells(Vec<String>),
    Separator,
}

/// Plain-text table for CLI reports. Column widths are computed from the
/// visible width of the cells, ignoring ANSI color escape sequences.
pub struct Table {
    alignments: Vec<Alignment>,
    headers: Option<Vec<String>>,
    rows: Vec<Row>,
}

impl Table {
    pub fn new_with_alignments(alignments: Vec<Alignment>) -> Self {
        Self {
            alignments,
            headers: None,
            rows: Vec::new(),
        }
    }

    pub fn set_headers(&mut self, headers: Vec<String>) {
        self.headers = Some(headers);
    }

    pub fn add_row(&mut self, cells: Vec<String>) {
        self.rows.push(Row::Cells(cells));
    }

    pub fn add_separator(&mut self) {
        self.rows.push(Row::Separator);
    }

    pub fn render(&self) -> String {
        let num_cols = self.alignments.len();
        let mut widths = vec![0usize; num_cols];

        let visible_rows = self
            .headers
            .iter()
            .chain(self.rows.iter().filter_map(|r| match r {
                Row::Cells(cells) => Some(cells),
                Row::Separator => None,
            }));

        for row in visible_rows.clone() {
            for (i, cell) in row.iter().take(num_cols).enumerate() {
                widths[i] = widths[i].max(visible_width(cell));
            }
        }

        let mut out = String::new();

        if let Some(headers) = &self.headers {
            out.push_str(&self.render_row(headers, &widths));
            out.push('\n');
        }

        for row in &self.rows {
            match row {
                Row::Cells(cells) => {
                    out.push_str(&self.render_row(cells, &widths));
                }
                Row::Separator => {
                    let total: usize = widths.iter().sum::<usize>() + 2 * (widths.len() - 1);
                    out.push_str(&"-".repeat(total));
                }
            }
            out.push('\n');
        }

        out
    }

    fn render_row(&self, cells: &[String], widths: &[usize]) -> String {
        let mut parts = Vec::with_capacity(widths.len());

        for (i, width) in widths.iter().enumerate() {
            let cell = cells.get(i).map(String::as_str).unwrap_or("");
            let pad = width.saturating_sub(visible_width(cell));

            let part = match self.alignments[i] {
                Alignment::Left => format!("{}{}", cell, " ".repeat(pad)),
                Alignment::Right => format!("{}{}", " ".repeat(pad), cell),
            };
            parts.push(part);
        }

        parts.join("  ").trim_end().to_string()
    }
}

/// Width of a string as displayed in the terminal (ANSI escapes stripped).
fn visible_width(s: &str) -> usize {
    let mut width = 0;
    let mut in_escape = false;

    for c in s.chars() {
        if in_escape {
            if c == 'm' {
                in_escape = false;
            }
        } else if c == '\x1b' {
            in_escape = true;
        } else {
            width += 1;
        }
    }

    width
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_aligned() {
        let mut table = Table::new_with_alignments(vec![Alignment::Left, Alignment::Right]);
        table.set_headers(vec!["name".to_string(), "count".to_string()]);
        table.add_row(vec!["a".to_string(), "1".to_string()]);
        table.add_row(vec!["longer".to_string(), "12345".to_string()]);

        let rendered = table.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "name    count");
        assert_eq!(lines[1], "a           1");
        assert_eq!(lines[2], "longer  12345");
    }

    #[test]
    fn test_visible_width_ignores_ansi() {
        let colored = "\x1b[1;32mok\x1b[0m";
        assert_eq!(visible_width(colored), 2);
    }
}
