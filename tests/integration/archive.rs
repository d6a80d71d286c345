//! Archive packaging and coalescing of concurrent diff packages

use feedbuild::archive::Archiver;
use feedbuild::build::BuildDiff;
use serde_json::json;
use std::fs::File;
use tempfile::TempDir;

fn content_dir(tmp: &TempDir) -> std::path::PathBuf {
    let content = tmp.path().join("content");
    std::fs::create_dir_all(&content).unwrap();
    std::fs::write(content.join("index.html"), "<h1>news</h1>").unwrap();
    std::fs::write(content.join("feed.json"), "[]").unwrap();
    content
}

fn diff() -> BuildDiff {
    BuildDiff {
        changes: vec!["index.html".into()],
        additions: vec!["feed.json".into()],
        deletions: vec!["old.html".into()],
    }
}

#[tokio::test]
async fn test_concurrent_diff_packaging_runs_once() {
    let tmp = TempDir::new().unwrap();
    let content = content_dir(&tmp);
    let zip_path = tmp.path().join("b1-content.zip");
    let archiver = Archiver::new();
    let (diff, manifest) = (diff(), json!({"buildid": "b2"}));

    let (a, b, c) = tokio::join!(
        archiver.diff_zip(&zip_path, &content, &diff, &manifest),
        archiver.diff_zip(&zip_path, &content, &diff, &manifest),
        archiver.diff_zip(&zip_path, &content, &diff, &manifest),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();
    assert_eq!(archiver.runs(), 1);

    let archive = zip::ZipArchive::new(File::open(&zip_path).unwrap()).unwrap();
    let mut names: Vec<&str> = archive.file_names().collect();
    names.sort();
    assert_eq!(names, vec!["feed.json", "index.html", "manifest.json"]);
}

#[tokio::test]
async fn test_packaging_again_after_completion_reruns() {
    let tmp = TempDir::new().unwrap();
    let content = content_dir(&tmp);
    let zip_path = tmp.path().join("b1-content.zip");
    let archiver = Archiver::new();
    let (diff, manifest) = (diff(), json!({}));

    archiver.diff_zip(&zip_path, &content, &diff, &manifest).await.unwrap();
    archiver.diff_zip(&zip_path, &content, &diff, &manifest).await.unwrap();
    assert_eq!(archiver.runs(), 2);
}

#[tokio::test]
async fn test_different_targets_package_independently() {
    let tmp = TempDir::new().unwrap();
    let content = content_dir(&tmp);
    let archiver = Archiver::new();
    let (diff, manifest) = (diff(), json!({}));
    let (first, second) = (tmp.path().join("a.zip"), tmp.path().join("b.zip"));

    let (a, b) = tokio::join!(
        archiver.diff_zip(&first, &content, &diff, &manifest),
        archiver.diff_zip(&second, &content, &diff, &manifest),
    );
    a.unwrap();
    b.unwrap();
    assert_eq!(archiver.runs(), 2);
    assert!(first.exists() && second.exists());
}
