//! Icon Manifest Provider: upstream checkout, release discovery, and SVG-to-icon matching.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use icon_map::{parse_icon_map, DuplicateFilename, IconMap};
use tracing::{info, warn};

/// Directories never searched for SVG assets.
pub const EXCLUDED_DIRS: &[&str] = &[".git", "node_modules", "dist", "build", "__pycache__", ".next"];

/// How many entries of each warning list are spelled out in logs.
pub const WARNING_SAMPLE: usize = 10;

/// A local clone of the upstream icon repository.
#[derive(Debug, Clone)]
pub struct GitCheckout {
    repo_url: String,
    dir: PathBuf,
}

impl GitCheckout {
    /// Describes a checkout of `repo_url` living at `dir`.
    pub fn new(repo_url: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_url: repo_url.into(),
            dir: dir.into(),
        }
    }

    /// Working tree root.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Clones, fetches tags, and checks out the newest `vN.0.0` tag. Returns that tag.
    pub fn prepare_latest(&self) -> Result<String> {
        self.ensure_cloned()?;
        self.fetch_tags()?;
        let tags = self.major_tags()?;
        let latest = latest_major_tag(tags.iter().map(String::as_str))
            .with_context(|| format!("no vN.0.0 release tags in {}", self.dir.display()))?;
        self.checkout(&latest)?;
        Ok(latest)
    }

    /// Clones the repository unless `dir/.git` already exists.
    pub fn ensure_cloned(&self) -> Result<()> {
        if self.dir.join(".git").exists() {
            info!(dir = %self.dir.display(), "repository already present");
            return Ok(());
        }
        if let Some(parent) = self.dir.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        info!(repo = %self.repo_url, dir = %self.dir.display(), "cloning repository");
        let dir = self.dir.to_string_lossy().into_owned();
        run_git(None, &["clone", &self.repo_url, &dir])?;
        Ok(())
    }

    /// Fetches remote tags.
    pub fn fetch_tags(&self) -> Result<()> {
        run_git(Some(&self.dir), &["fetch", "--tags"])?;
        Ok(())
    }

    /// Local tags matching `v*.0.0`.
    pub fn major_tags(&self) -> Result<Vec<String>> {
        let stdout = run_git(Some(&self.dir), &["tag", "-l", "v*.0.0"])?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Checks out `tag`.
    pub fn checkout(&self, tag: &str) -> Result<()> {
        run_git(Some(&self.dir), &["checkout", tag])?;
        info!(tag, "checked out release");
        Ok(())
    }
}

fn run_git(cwd: Option<&Path>, args: &[&str]) -> Result<String> {
    let mut command = Command::new("git");
    command.args(args);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    let output = command
        .output()
        .with_context(|| format!("failed to spawn git {}", args.join(" ")))?;
    anyhow::ensure!(
        output.status.success(),
        "git {} failed ({}): {}",
        args.join(" "),
        output.status,
        String::from_utf8_lossy(&output.stderr).trim()
    );
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Newest `vMAJOR.0.0` tag by numeric major version. Other tags are ignored.
pub fn latest_major_tag<'a>(tags: impl IntoIterator<Item = &'a str>) -> Option<String> {
    tags.into_iter()
        .filter_map(|tag| major_version(tag).map(|major| (major, tag)))
        .max_by_key(|(major, _)| *major)
        .map(|(_, tag)| tag.to_string())
}

fn major_version(tag: &str) -> Option<u64> {
    let rest = tag.trim().strip_prefix('v')?;
    let mut parts = rest.split('.');
    let major = parts.next()?.parse::<u64>().ok()?;
    let minor = parts.next()?.parse::<u64>().ok()?;
    let patch = parts.next()?.parse::<u64>().ok()?;
    (parts.next().is_none() && minor == 0 && patch == 0).then_some(major)
}

/// Every `*.svg` below `root`, skipping [`EXCLUDED_DIRS`], sorted by path.
pub fn find_svg_files(root: &Path) -> Result<Vec<PathBuf>> {
    anyhow::ensure!(root.is_dir(), "{} is not a directory", root.display());
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries =
            fs::read_dir(&dir).with_context(|| format!("failed to list {}", dir.display()))?;
        for entry in entries {
            let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .with_context(|| format!("failed to stat {}", path.display()))?;
            if file_type.is_dir() {
                let excluded = entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| EXCLUDED_DIRS.contains(&name));
                if !excluded {
                    pending.push(path);
                }
            } else if path.extension().is_some_and(|ext| ext == "svg") {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Filename without directory or extension.
pub fn file_stem(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|stem| stem.to_str())
}

/// An SVG asset paired with its logical icon name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedIcon {
    /// Logical icon name.
    pub icon_name: String,
    /// Filename stem shared by the asset and the registry.
    pub filename: String,
    /// Asset location.
    pub svg_path: PathBuf,
}

/// Outcome of pairing discovered SVG files with registry entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchReport {
    /// Pairs to index, one per filename, in path order.
    pub matched: Vec<MatchedIcon>,
    /// SVG files whose stem is not in the registry.
    pub unmatched_svgs: Vec<PathBuf>,
    /// SVG files whose stem was already matched by an earlier path.
    pub shadowed_svgs: Vec<PathBuf>,
    /// Registry icons with no SVG file.
    pub missing_icons: Vec<String>,
    /// Filenames claimed by several icon names (last claim kept).
    pub duplicates: Vec<DuplicateFilename>,
}

impl MatchReport {
    /// Emits one summary event plus a bounded sample of each warning category.
    pub fn log_summary(&self) {
        info!(
            matched = self.matched.len(),
            unmatched = self.unmatched_svgs.len(),
            shadowed = self.shadowed_svgs.len(),
            missing = self.missing_icons.len(),
            duplicates = self.duplicates.len(),
            "matched SVG files to icon names"
        );
        for duplicate in self.duplicates.iter().take(WARNING_SAMPLE) {
            warn!(
                filename = %duplicate.filename,
                kept = %duplicate.kept,
                dropped = %duplicate.dropped,
                "filename mapped by several icon names"
            );
        }
        for path in self.unmatched_svgs.iter().take(WARNING_SAMPLE) {
            warn!(path = %path.display(), "SVG file has no icon mapping");
        }
        for path in self.shadowed_svgs.iter().take(WARNING_SAMPLE) {
            warn!(path = %path.display(), "SVG file shadowed by an earlier file with the same name");
        }
        for icon in self.missing_icons.iter().take(WARNING_SAMPLE) {
            warn!(icon = %icon, "icon has no SVG file");
        }
    }
}

/// Pairs each SVG file with the icon that owns its stem.
pub fn match_svg_files(map: &IconMap, svg_files: &[PathBuf]) -> MatchReport {
    let index = map.by_filename();
    let mut report = MatchReport {
        duplicates: index.duplicates.clone(),
        ..MatchReport::default()
    };
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    for path in svg_files {
        let Some(stem) = file_stem(path) else {
            report.unmatched_svgs.push(path.clone());
            continue;
        };
        match index.by_filename.get(stem) {
            Some(icon_name) if seen.insert(stem) => report.matched.push(MatchedIcon {
                icon_name: icon_name.clone(),
                filename: stem.to_string(),
                svg_path: path.clone(),
            }),
            Some(_) => report.shadowed_svgs.push(path.clone()),
            None => report.unmatched_svgs.push(path.clone()),
        }
    }
    report.missing_icons = index
        .by_filename
        .iter()
        .filter(|(filename, _)| !seen.contains(filename.as_str()))
        .map(|(_, icon)| icon.clone())
        .collect();
    report
}

/// Everything a batch run needs from the upstream tree.
#[derive(Debug, Clone)]
pub struct ManifestSnapshot {
    /// Release the tree is checked out at.
    pub release_tag: String,
    /// Matching outcome.
    pub report: MatchReport,
}

impl ManifestSnapshot {
    /// Reads the registry at `root/icon_map_path`, walks `root` for SVGs, and matches them.
    pub fn load(root: &Path, icon_map_path: &Path, release_tag: impl Into<String>) -> Result<Self> {
        let map_file = root.join(icon_map_path);
        let source = fs::read_to_string(&map_file)
            .with_context(|| format!("failed to read icon map {}", map_file.display()))?;
        let map = parse_icon_map(&source)
            .with_context(|| format!("failed to parse icon map {}", map_file.display()))?;
        info!(entries = map.len(), "parsed icon map");
        let svg_files = find_svg_files(root)?;
        let report = match_svg_files(&map, &svg_files);
        report.log_summary();
        Ok(Self {
            release_tag: release_tag.into(),
            report,
        })
    }

    /// Matched icons, in processing order.
    pub fn icons(&self) -> &[MatchedIcon] {
        &self.report.matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn latest_major_tag_is_numeric() {
        let tags = ["v9.0.0", "v109.0.0", "v11.0.0", "v110.1.0", "v108.0.0-rc", "release"];
        assert_eq!(latest_major_tag(tags), Some("v109.0.0".to_string()));
        assert_eq!(latest_major_tag(["v1.2.3"]), None);
    }

    fn write(root: &Path, rel: &str, contents: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn finds_svgs_outside_excluded_dirs() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let kept = write(root, "src/assets/search.svg", "<svg/>");
        write(root, "node_modules/pkg/search.svg", "<svg/>");
        write(root, "dist/search.svg", "<svg/>");
        write(root, "src/assets/readme.md", "");
        assert_eq!(find_svg_files(root).unwrap(), vec![kept]);
    }

    #[test]
    fn matching_reports_every_category() {
        let map = parse_icon_map(
            "export const typeToPathMap = { alert: 'warning', warning: 'warning', search: 'search', help: 'question' }",
        )
        .unwrap();
        let files = vec![
            PathBuf::from("a/search.svg"),
            PathBuf::from("a/stray.svg"),
            PathBuf::from("a/warning.svg"),
            PathBuf::from("b/search.svg"),
        ];
        let report = match_svg_files(&map, &files);
        assert_eq!(
            report.matched,
            vec![
                MatchedIcon {
                    icon_name: "search".into(),
                    filename: "search".into(),
                    svg_path: PathBuf::from("a/search.svg"),
                },
                MatchedIcon {
                    icon_name: "warning".into(),
                    filename: "warning".into(),
                    svg_path: PathBuf::from("a/warning.svg"),
                },
            ]
        );
        assert_eq!(report.unmatched_svgs, vec![PathBuf::from("a/stray.svg")]);
        assert_eq!(report.shadowed_svgs, vec![PathBuf::from("b/search.svg")]);
        assert_eq!(report.missing_icons, vec!["help".to_string()]);
        assert_eq!(report.duplicates.len(), 1);
        assert_eq!(report.duplicates[0].dropped, "alert");
    }

    #[test]
    fn snapshot_loads_from_tree() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(
            root,
            "src/components/icon/icon_map.ts",
            "export const typeToPathMap = { search: 'search', logoElastic: 'logo_elastic' };",
        );
        write(root, "src/components/icon/assets/search.svg", "<svg/>");
        write(root, "src/components/icon/assets/logo_elastic.svg", "<svg/>");
        let snapshot =
            ManifestSnapshot::load(root, Path::new("src/components/icon/icon_map.ts"), "v2.0.0")
                .unwrap();
        let names: Vec<&str> = snapshot.icons().iter().map(|i| i.icon_name.as_str()).collect();
        assert_eq!(names, vec!["logoElastic", "search"]);
        assert_eq!(snapshot.release_tag, "v2.0.0");
    }

    #[test]
    fn git_checkout_reads_local_tags() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("repo");
        fs::create_dir_all(&dir).unwrap();
        let git = |args: &[&str]| {
            let status = Command::new("git").args(args).current_dir(&dir).output();
            status.map(|out| out.status.success()).unwrap_or(false)
        };
        if !git(&["init", "-q"]) {
            return;
        }
        fs::write(dir.join("a.svg"), "<svg/>").unwrap();
        assert!(git(&["add", "."]));
        assert!(git(&[
            "-c", "user.name=test", "-c", "user.email=test@example.com",
            "commit", "-q", "-m", "init"
        ]));
        for tag in ["v8.0.0", "v10.0.0", "v10.1.0"] {
            assert!(git(&["tag", tag]));
        }
        let checkout = GitCheckout::new("unused", &dir);
        checkout.ensure_cloned().unwrap();
        let tags = checkout.major_tags().unwrap();
        assert_eq!(latest_major_tag(tags.iter().map(String::as_str)), Some("v10.0.0".into()));
        checkout.checkout("v10.0.0").unwrap();
    }
}
