//! 世界存档结构校验：要求同一顶层目录下同时存在 region/*.mca 与 level.dat。

use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Seek};

use zip::ZipArchive;

const LEVEL_FILE: &str = "level.dat";
const REGION_DIR: &str = "region/";
const REGION_EXTENSION: &str = ".mca";

#[derive(Debug, PartialEq, Eq)]
pub enum ArchiveRejection {
    /// 无法按 zip 解析。
    Malformed(String),
    Empty,
    MissingEntries { has_region: bool, has_level: bool },
}

impl fmt::Display for ArchiveRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveRejection::Malformed(reason) => write!(f, "unreadable archive: {reason}"),
            ArchiveRejection::Empty => f.write_str("archive has no entries"),
            ArchiveRejection::MissingEntries {
                has_region,
                has_level,
            } => write!(
                f,
                "archive is not a world save (region files: {has_region}, level.dat: {has_level})"
            ),
        }
    }
}

#[derive(Clone, Copy, Default)]
struct Markers {
    region: bool,
    level: bool,
}

/// 解析 zip 中央目录并校验条目列表，只读目录不解压内容。
pub fn inspect<R: Read + Seek>(reader: R) -> Result<(), ArchiveRejection> {
    let archive = ZipArchive::new(reader)
        .map_err(|err| ArchiveRejection::Malformed(err.to_string()))?;
    validate(archive.file_names())
}

/// 单次遍历条目路径，任一顶层目录满足两个标记即接受。
pub fn validate<'a, I>(entries: I) -> Result<(), ArchiveRejection>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut roots: HashMap<&'a str, Markers> = HashMap::new();
    let mut seen = Markers::default();
    let mut any_entry = false;

    for entry in entries {
        any_entry = true;
        let Some((root, rest)) = entry.split_once('/') else {
            continue;
        };
        if root.is_empty() || rest.is_empty() {
            continue;
        }

        let markers = roots.entry(root).or_default();
        if rest == LEVEL_FILE {
            markers.level = true;
        } else if let Some(region_path) = rest.strip_prefix(REGION_DIR)
            && is_region_file(region_path)
        {
            markers.region = true;
        }

        seen.region |= markers.region;
        seen.level |= markers.level;
        if markers.region && markers.level {
            return Ok(());
        }
    }

    if !any_entry {
        return Err(ArchiveRejection::Empty);
    }
    Err(ArchiveRejection::MissingEntries {
        has_region: seen.region,
        has_level: seen.level,
    })
}

fn is_region_file(path: &str) -> bool {
    if path.ends_with('/') {
        return false;
    }
    path.rsplit('/')
        .next()
        .and_then(|name| name.strip_suffix(REGION_EXTENSION))
        .is_some_and(|stem| !stem.is_empty())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    /// 构造测试用 zip，目录条目以 `/` 结尾。
    pub(crate) fn build_zip(entries: &[&str]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for entry in entries {
            if entry.ends_with('/') {
                writer.add_directory(*entry, options).expect("add directory");
            } else {
                writer.start_file(*entry, options).expect("start file");
                writer.write_all(entry.as_bytes()).expect("write entry");
            }
        }
        writer.finish().expect("finish zip").into_inner()
    }

    pub(crate) fn world_zip() -> Vec<u8> {
        build_zip(&[
            "world/",
            "world/region/",
            "world/region/r.0.0.mca",
            "world/level.dat",
        ])
    }

    #[test]
    fn accepts_minimal_world() {
        assert_eq!(
            validate(["world/region/r.0.0.mca", "world/level.dat"]),
            Ok(())
        );
    }

    #[test]
    fn accepts_when_level_comes_first_and_extras_present() {
        let entries = [
            "My World/level.dat",
            "My World/icon.png",
            "My World/DIM-1/region/r.0.0.mca",
            "My World/region/r.-1.2.mca",
        ];
        assert_eq!(validate(entries), Ok(()));
    }

    #[test]
    fn rejects_missing_level() {
        assert_eq!(
            validate(["world/region/r.0.0.mca", "world/session.lock"]),
            Err(ArchiveRejection::MissingEntries {
                has_region: true,
                has_level: false
            })
        );
    }

    #[test]
    fn rejects_missing_region() {
        assert_eq!(
            validate(["world/level.dat", "world/region/", "world/region/notes.txt"]),
            Err(ArchiveRejection::MissingEntries {
                has_region: false,
                has_level: true
            })
        );
    }

    #[test]
    fn markers_must_share_a_top_level_directory() {
        assert!(matches!(
            validate(["a/region/r.0.0.mca", "b/level.dat"]),
            Err(ArchiveRejection::MissingEntries {
                has_region: true,
                has_level: true
            })
        ));
    }

    #[test]
    fn ignores_entries_without_top_level_directory() {
        assert!(validate(["level.dat", "region/r.0.0.mca"]).is_err());
    }

    #[test]
    fn nested_level_dat_does_not_count() {
        assert!(validate(["world/region/r.0.0.mca", "world/backup/level.dat"]).is_err());
    }

    #[test]
    fn rejects_empty_listing() {
        assert_eq!(
            validate(std::iter::empty::<&str>()),
            Err(ArchiveRejection::Empty)
        );
    }

    #[test]
    fn inspect_reads_real_archives() {
        assert_eq!(inspect(Cursor::new(world_zip())), Ok(()));
        assert_eq!(
            inspect(Cursor::new(build_zip(&[]))),
            Err(ArchiveRejection::Empty)
        );
        assert!(matches!(
            inspect(Cursor::new(build_zip(&["world/region/r.0.0.mca"]))),
            Err(ArchiveRejection::MissingEntries { .. })
        ));
    }

    #[test]
    fn inspect_rejects_non_zip_bytes() {
        assert!(matches!(
            inspect(Cursor::new(b"definitely not a zip file")),
            Err(ArchiveRejection::Malformed(_))
        ));
    }
}
