//! Coverage summaries: a text table and a Cobertura XML document.
//!
//! Both renderings are pure functions of the merged report, so the same
//! fragment set always yields byte-identical output.

use super::CoverageError;
use super::merge::{CoverageReport, FileCoverage};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Counts for one file or for the total
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageCounts {
    /// Executable lines
    pub statements: usize,
    /// Executable lines never hit
    pub missed: usize,
    /// Branch arcs
    pub branches: usize,
    /// Arcs never taken
    pub branches_missed: usize,
    /// Lines with partially taken branches
    pub partial: usize,
}

impl CoverageCounts {
    fn of(file: &FileCoverage) -> Self {
        Self {
            statements: file.statements(),
            missed: file.missed(),
            branches: file.branch_count(),
            branches_missed: file.branches_missed(),
            partial: file.partial_lines(),
        }
    }

    fn add(&mut self, other: &Self) {
        self.statements += other.statements;
        self.missed += other.missed;
        self.branches += other.branches;
        self.branches_missed += other.branches_missed;
        self.partial += other.partial;
    }

    /// Percentage of statements and arcs covered; 100 when nothing is measurable
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> f64 {
        let total = self.statements + self.branches;
        if total == 0 {
            return 100.0;
        }
        let covered = (self.statements - self.missed) + (self.branches - self.branches_missed);
        covered as f64 * 100.0 / total as f64
    }

    /// Percentage rounded for display
    ///
    /// Never shows `100` for incomplete coverage nor `0` for some coverage.
    #[must_use]
    pub fn display_percent(&self, precision: usize) -> String {
        let pc = self.percent();
        let factor = 10f64.powi(i32::try_from(precision).unwrap_or(i32::MAX));
        let mut rounded = (pc * factor).round() / factor;
        if rounded >= 100.0 && pc < 100.0 {
            rounded = 100.0 - 1.0 / factor;
        } else if rounded <= 0.0 && pc > 0.0 {
            rounded = 1.0 / factor;
        }
        format!("{rounded:.precision$}")
    }
}

/// Per-file and total counts of a merged report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageSummary {
    /// Canonical path -> counts
    pub files: BTreeMap<String, CoverageCounts>,
    /// Sum over all files
    pub total: CoverageCounts,
}

impl CoverageSummary {
    /// Summarises a merged report
    #[must_use]
    pub fn new(report: &CoverageReport) -> Self {
        let mut summary = Self::default();
        for (path, file) in &report.files {
            let counts = CoverageCounts::of(file);
            summary.total.add(&counts);
            summary.files.insert(path.clone(), counts);
        }
        summary
    }

    /// Renders the summary as a text table
    #[must_use]
    pub fn render_text(&self, precision: usize) -> String {
        let with_branches = self.total.branches > 0;
        let name_width = self
            .files
            .keys()
            .map(String::len)
            .chain(std::iter::once("TOTAL".len()))
            .max()
            .unwrap_or(5)
            .max("Name".len());
        let cover_width = (precision + 5).max("Cover".len());

        let mut header = format!("{:<name_width$}   Stmts   Miss", "Name");
        if with_branches {
            header.push_str(" Branch BrPart");
        }
        let _ = write!(header, "  {:>cover_width$}", "Cover");
        let rule = "-".repeat(header.len());

        let row = |name: &str, counts: &CoverageCounts| {
            let mut line = format!(
                "{name:<name_width$}  {:>6} {:>6}",
                counts.statements, counts.missed
            );
            if with_branches {
                let _ = write!(line, " {:>6} {:>6}", counts.branches, counts.partial);
            }
            let percent = format!("{}%", counts.display_percent(precision));
            let _ = write!(line, "  {percent:>cover_width$}");
            line
        };

        let mut out = String::new();
        let _ = writeln!(out, "{header}");
        let _ = writeln!(out, "{rule}");
        for (path, counts) in &self.files {
            let _ = writeln!(out, "{}", row(path, counts));
        }
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "{}", row("TOTAL", &self.total));
        out
    }
}

/// Renders a Cobertura XML document
///
/// Files are grouped into packages by directory; everything is sorted and
/// no timestamp is written.
pub fn render_cobertura(
    report: &CoverageReport,
    source_root: &str,
) -> Result<String, CoverageError> {
    let mut packages: BTreeMap<String, Vec<(&String, &FileCoverage)>> = BTreeMap::new();
    for (path, file) in &report.files {
        let package = path
            .rsplit_once('/')
            .map_or(".", |(dir, _)| dir)
            .replace('/', ".");
        packages.entry(package).or_default().push((path, file));
    }

    let total = CoverageSummary::new(report).total;
    let mut writer = Writer::new_with_indent(Vec::new(), b'\t', 1);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", None, None)))?;

    let version = format!("relayline {}", env!("CARGO_PKG_VERSION"));
    let lines_valid = total.statements.to_string();
    let lines_covered = (total.statements - total.missed).to_string();
    let branches_valid = total.branches.to_string();
    let branches_covered = (total.branches - total.branches_missed).to_string();
    let coverage = BytesStart::new("coverage").with_attributes([
        ("version", version.as_str()),
        ("lines-valid", lines_valid.as_str()),
        ("lines-covered", lines_covered.as_str()),
        ("line-rate", line_rate(&total).as_str()),
        ("branches-valid", branches_valid.as_str()),
        ("branches-covered", branches_covered.as_str()),
        ("branch-rate", branch_rate(&total).as_str()),
        ("complexity", "0"),
    ]);
    writer.write_event(Event::Start(coverage))?;

    writer.write_event(Event::Start(BytesStart::new("sources")))?;
    writer.write_event(Event::Start(BytesStart::new("source")))?;
    writer.write_event(Event::Text(BytesText::new(&xml_chars(source_root))))?;
    writer.write_event(Event::End(BytesEnd::new("source")))?;
    writer.write_event(Event::End(BytesEnd::new("sources")))?;

    writer.write_event(Event::Start(BytesStart::new("packages")))?;
    for (package, files) in &packages {
        let mut counts = CoverageCounts::default();
        for (_, file) in files {
            counts.add(&CoverageCounts::of(file));
        }
        let name = xml_chars(package);
        let element = BytesStart::new("package").with_attributes([
            ("name", name.as_str()),
            ("line-rate", line_rate(&counts).as_str()),
            ("branch-rate", branch_rate(&counts).as_str()),
            ("complexity", "0"),
        ]);
        writer.write_event(Event::Start(element))?;
        writer.write_event(Event::Start(BytesStart::new("classes")))?;
        for (path, file) in files {
            write_class(&mut writer, path, file)?;
        }
        writer.write_event(Event::End(BytesEnd::new("classes")))?;
        writer.write_event(Event::End(BytesEnd::new("package")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("packages")))?;
    writer.write_event(Event::End(BytesEnd::new("coverage")))?;

    let mut xml = String::from_utf8_lossy(&writer.into_inner()).into_owned();
    xml.push('\n');
    Ok(xml)
}

fn write_class(
    writer: &mut Writer<Vec<u8>>,
    path: &str,
    file: &FileCoverage,
) -> Result<(), quick_xml::Error> {
    let counts = CoverageCounts::of(file);
    let filename = xml_chars(path);
    let name = filename.rsplit_once('/').map_or(filename.as_str(), |(_, name)| name);
    let element = BytesStart::new("class").with_attributes([
        ("name", name),
        ("filename", filename.as_str()),
        ("complexity", "0"),
        ("line-rate", line_rate(&counts).as_str()),
        ("branch-rate", branch_rate(&counts).as_str()),
    ]);
    writer.write_event(Event::Start(element))?;
    writer.write_event(Event::Empty(BytesStart::new("methods")))?;
    writer.write_event(Event::Start(BytesStart::new("lines")))?;

    let mut arcs: BTreeMap<u32, (usize, usize)> = BTreeMap::new();
    for (&(from, _), &hits) in &file.branches {
        let (taken, total) = arcs.entry(from).or_default();
        *total += 1;
        if hits > 0 {
            *taken += 1;
        }
    }

    for (&line, &hits) in &file.lines {
        let number = line.to_string();
        let hits = hits.to_string();
        let mut element = BytesStart::new("line")
            .with_attributes([("number", number.as_str()), ("hits", hits.as_str())]);
        if let Some(&(taken, total)) = arcs.get(&line) {
            let condition = format!("{}% ({taken}/{total})", taken * 100 / total);
            element.push_attribute(("branch", "true"));
            element.push_attribute(("condition-coverage", condition.as_str()));
        }
        writer.write_event(Event::Empty(element))?;
    }

    writer.write_event(Event::End(BytesEnd::new("lines")))?;
    writer.write_event(Event::End(BytesEnd::new("class")))?;
    Ok(())
}

/// Replaces characters XML 1.0 cannot carry with U+FFFD
fn xml_chars(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\t' | '\n' | '\r' => c,
            c if c < ' ' || c == '\u{FFFE}' || c == '\u{FFFF}' => '\u{FFFD}',
            c => c,
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn line_rate(counts: &CoverageCounts) -> String {
    if counts.statements == 0 {
        return "1".to_string();
    }
    let rate = (counts.statements - counts.missed) as f64 / counts.statements as f64;
    format!("{}", (rate * 10_000.0).round() / 10_000.0)
}

#[allow(clippy::cast_precision_loss)]
fn branch_rate(counts: &CoverageCounts) -> String {
    if counts.branches == 0 {
        return "0".to_string();
    }
    let rate = (counts.branches - counts.branches_missed) as f64 / counts.branches as f64;
    format!("{}", (rate * 10_000.0).round() / 10_000.0)
}
