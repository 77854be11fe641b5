// src/jobdata/diff.rs

//! Section-wise comparison of two jobs.
//!
//! Each job is rendered into text sections (command line, time, variants,
//! results, config, sysinfo); sections that differ are printed as a line
//! diff under `--- <id1>` / `+++ <id2>` headers.

use std::fmt::{self, Write as _};
use std::fs;
use std::path::Path;
use std::str::FromStr;

use walkdir::WalkDir;

use crate::errors::{AvocadoError, Result};
use crate::jobdata::{retrieve_cmdline, retrieve_config, retrieve_variants};
use crate::paths::JobLayout;
use crate::result::JobResults;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiffSection {
    Cmdline,
    Time,
    Variants,
    Results,
    Config,
    Sysinfo,
}

impl DiffSection {
    pub const ALL: [DiffSection; 6] = [
        DiffSection::Cmdline,
        DiffSection::Time,
        DiffSection::Variants,
        DiffSection::Results,
        DiffSection::Config,
        DiffSection::Sysinfo,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DiffSection::Cmdline => "cmdline",
            DiffSection::Time => "time",
            DiffSection::Variants => "variants",
            DiffSection::Results => "results",
            DiffSection::Config => "config",
            DiffSection::Sysinfo => "sysinfo",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            DiffSection::Cmdline => "COMMAND LINE",
            DiffSection::Time => "TOTAL TIME",
            DiffSection::Variants => "VARIANTS",
            DiffSection::Results => "TEST RESULTS",
            DiffSection::Config => "SETTINGS",
            DiffSection::Sysinfo => "SYSINFO",
        }
    }
}

impl fmt::Display for DiffSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DiffSection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        DiffSection::ALL
            .into_iter()
            .find(|section| section.name() == s)
            .ok_or_else(|| format!("invalid diff filter '{s}'"))
    }
}

/// Parsed `--diff-filter`: `all`, section names and `-section` exclusions.
///
/// Exclusions without any inclusion imply `all`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffFilter {
    all: bool,
    include: Vec<DiffSection>,
    exclude: Vec<DiffSection>,
}

impl Default for DiffFilter {
    fn default() -> Self {
        Self {
            all: true,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

impl DiffFilter {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut filter = DiffFilter {
            all: false,
            include: Vec::new(),
            exclude: Vec::new(),
        };
        for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if token == "all" {
                filter.all = true;
            } else if let Some(name) = token.strip_prefix('-') {
                filter.exclude.push(name.parse().map_err(AvocadoError::Config)?);
            } else {
                filter.include.push(token.parse().map_err(AvocadoError::Config)?);
            }
        }
        if filter.include.is_empty() {
            filter.all = true;
        }
        Ok(filter)
    }

    pub fn enabled(&self, section: DiffSection) -> bool {
        (self.all || self.include.contains(&section)) && !self.exclude.contains(&section)
    }
}

/// One line of a line diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine<'a> {
    Same(&'a str),
    Removed(&'a str),
    Added(&'a str),
}

/// Longest-common-subsequence line diff of `a` against `b`.
pub fn line_diff<'a>(a: &'a [String], b: &'a [String]) -> Vec<DiffLine<'a>> {
    let (n, m) = (a.len(), b.len());
    // lcs[i][j]: LCS length of a[i..] and b[j..]
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut out = Vec::with_capacity(n.max(m));
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            out.push(DiffLine::Same(&a[i]));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            out.push(DiffLine::Removed(&a[i]));
            i += 1;
        } else {
            out.push(DiffLine::Added(&b[j]));
            j += 1;
        }
    }
    out.extend(a[i..].iter().map(|l| DiffLine::Removed(l)));
    out.extend(b[j..].iter().map(|l| DiffLine::Added(l)));
    out
}

/// Render `section` of the job in `results_dir` as lines.
pub fn section_lines(results_dir: &Path, section: DiffSection) -> Result<Vec<String>> {
    let layout = JobLayout::new(results_dir);
    let lines = match section {
        DiffSection::Cmdline => vec![match retrieve_cmdline(results_dir)? {
            Some(argv) => argv.join(" "),
            None => "Not found".to_string(),
        }],
        DiffSection::Time => vec![format!("{} (secs)", load_results(&layout)?.time)],
        DiffSection::Variants => variants_lines(results_dir)?,
        DiffSection::Results => load_results(&layout)?
            .tests
            .iter()
            .map(|t| format!("{}: {}", t.id, t.status))
            .collect(),
        DiffSection::Config => retrieve_config(results_dir)?
            .map(|text| text.lines().map(str::to_string).collect())
            .unwrap_or_else(|| vec!["Not found".to_string()]),
        DiffSection::Sysinfo => sysinfo_lines(&layout)?,
    };
    Ok(lines)
}

fn load_results(layout: &JobLayout) -> Result<JobResults> {
    JobResults::load(&layout.results_json())
}

fn variants_lines(results_dir: &Path) -> Result<Vec<String>> {
    let Some(suites) = retrieve_variants(results_dir)? else {
        return Ok(vec!["Not found".to_string()]);
    };
    let mut lines = Vec::new();
    for (index, suite, variants) in suites {
        for (i, variant) in variants.iter().enumerate() {
            let id = variant.variant_id.as_deref().unwrap_or("default");
            lines.push(format!("Suite {index} ({suite}) variant {}: {id}", i + 1));
            for (key, value) in variant.env() {
                lines.push(format!("    {key}: {value}"));
            }
        }
    }
    Ok(lines)
}

fn sysinfo_lines(layout: &JobLayout) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for phase in ["pre", "post"] {
        let dir = layout.sysinfo_dir(phase);
        if !dir.is_dir() {
            continue;
        }
        let mut files: Vec<_> = WalkDir::new(&dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        files.sort();
        for file in files {
            let rel = file.strip_prefix(&dir).unwrap_or(&file);
            lines.push(format!("{phase}/{}:", rel.display()));
            let bytes = fs::read(&file)?;
            lines.extend(
                String::from_utf8_lossy(&bytes)
                    .lines()
                    .map(|l| format!("    {l}")),
            );
        }
    }
    Ok(lines)
}

/// Diff two jobs. Returns an empty string when no enabled section differs.
pub fn diff_jobs(
    (dir1, id1): (&Path, &str),
    (dir2, id2): (&Path, &str),
    filter: &DiffFilter,
) -> Result<String> {
    let mut body = String::new();
    for section in DiffSection::ALL {
        if !filter.enabled(section) {
            continue;
        }
        let a = section_lines(dir1, section)?;
        let b = section_lines(dir2, section)?;
        if a == b {
            continue;
        }
        let _ = writeln!(body, "@@ {} @@", section.title());
        for line in line_diff(&a, &b) {
            let _ = match line {
                DiffLine::Same(l) => writeln!(body, " {l}"),
                DiffLine::Removed(l) => writeln!(body, "-{l}"),
                DiffLine::Added(l) => writeln!(body, "+{l}"),
            };
        }
    }

    if body.is_empty() {
        return Ok(body);
    }
    Ok(format!("--- {id1}\n+++ {id2}\n{body}"))
}
