//! Build context: commit fixpoint, file transfer rules and content generation

use crate::integration::test_utils::{create_test_tree, read_to_string, FakeHttp, FakeImageService};
use feedbuild::combiners::CombinerKind;
use feedbuild::context::{BuildContext, Ref};
use feedbuild::entity::{Entity, EvalData, ResizeOptions, TextSource};
use feedbuild::error::BuildError;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

fn context(input: &TempDir, output: &TempDir) -> (BuildContext, Arc<FakeImageService>) {
    let images = Arc::new(FakeImageService::new());
    let cx = BuildContext::builder(input.path(), output.path())
        .image_service(images.clone())
        .http(Arc::new(FakeHttp::new()))
        .build()
        .unwrap();
    (cx, images)
}

#[tokio::test]
async fn test_commit_runs_work_queued_while_rendering() {
    let input = create_test_tree(&[("page.tpl", "<img src=\"{thumb}\">"), ("photo.jpg", "jpeg")]);
    let output = TempDir::new().unwrap();
    let (cx, images) = context(&input, &output);

    let item = EvalData::new(json!({"name": "index.html"})).with_helper(
        "thumb",
        |cx: BuildContext, _data: Value| async move {
            cx.images("photo.jpg")?
                .resize(ResizeOptions::width(10))
                .write("x.png");
            Ok::<_, BuildError>(json!("x.png"))
        },
    );
    cx.eval("page.tpl", vec![item]).unwrap().write("");

    let report = cx.commit().await.unwrap();
    assert!(report.waves >= 2, "resize was queued by the render wave");
    assert_eq!(cx.pending_operations(), 0);

    assert_eq!(read_to_string(output.path().join("index.html")), "<img src=\"x.png\">");
    let thumb = read_to_string(output.path().join("x.png"));
    assert!(thumb.ends_with("photo.jpg?w=10"), "{}", thumb);
    assert_eq!(images.resizes(), 1);
}

#[tokio::test]
async fn test_file_copied_onto_directory_keeps_its_name() {
    let input = create_test_tree(&[("a.txt", "alpha")]);
    let output = TempDir::new().unwrap();
    std::fs::create_dir_all(output.path().join("assets")).unwrap();
    let (cx, _) = context(&input, &output);

    cx.cp("a.txt", "assets").unwrap();
    cx.commit().await.unwrap();

    assert_eq!(read_to_string(output.path().join("assets/a.txt")), "alpha");
}

#[tokio::test]
async fn test_directory_onto_file_fails_naming_both_paths() {
    let input = create_test_tree(&[("docs/b.txt", "beta")]);
    let output = TempDir::new().unwrap();
    std::fs::write(output.path().join("target"), "occupied").unwrap();
    let (cx, _) = context(&input, &output);

    cx.cp("docs", "target").unwrap();
    let err = cx.commit().await.unwrap_err();

    match err {
        BuildError::FileOp { from, to, .. } => {
            assert!(from.ends_with("docs"), "{:?}", from);
            assert!(to.ends_with("target"), "{:?}", to);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(read_to_string(output.path().join("target")), "occupied");
}

#[tokio::test]
async fn test_moving_an_input_file_leaves_the_source() {
    let input = create_test_tree(&[("a.txt", "alpha")]);
    let output = TempDir::new().unwrap();
    let (cx, _) = context(&input, &output);

    let moved = cx.files("a.txt").unwrap().mv("moved.txt");
    cx.commit().await.unwrap();

    assert!(input.path().join("a.txt").exists());
    assert_eq!(read_to_string(output.path().join("moved.txt")), "alpha");
    assert_eq!(moved.ids().collect::<Vec<_>>(), vec!["a.txt"]);
}

#[tokio::test]
async fn test_moving_generated_output_removes_it() {
    let input = create_test_tree(&[]);
    let output = TempDir::new().unwrap();
    let (cx, _) = context(&input, &output);

    let page = cx
        .render("hello {who}", vec![EvalData::new(json!({"name": "draft.html", "who": "world"}))])
        .unwrap()
        .write("");
    page.mv("final.html");
    cx.commit().await.unwrap();

    assert!(!output.path().join("draft.html").exists());
    assert_eq!(read_to_string(output.path().join("final.html")), "hello world");
}

#[tokio::test]
async fn test_css_sources_merge_in_order() {
    let input = create_test_tree(&[
        ("a.css", "p { margin: 0; color: red; }"),
        ("b.css", "p { color: blue; } h1 { font-weight: bold; }"),
    ]);
    let output = TempDir::new().unwrap();
    let (cx, _) = context(&input, &output);

    let sources: Vec<TextSource> = vec![
        cx.file("a.css").unwrap().into(),
        cx.file("b.css").unwrap().into(),
    ];
    cx.combine(CombinerKind::Css, "site.css", sources).write("css");
    cx.commit().await.unwrap();

    assert_eq!(
        read_to_string(output.path().join("css/site.css")),
        "h1 {font-weight: bold;}p {color: blue;margin: 0;}"
    );
}

#[tokio::test]
async fn test_json_to_writes_exact_path() {
    let input = create_test_tree(&[]);
    let output = TempDir::new().unwrap();
    let (cx, _) = context(&input, &output);

    cx.json_to(&json!({"posts": [1, 2]}), "data/feed.json", false).unwrap();
    cx.commit().await.unwrap();

    let written: Value = serde_json::from_str(&read_to_string(output.path().join("data/feed.json"))).unwrap();
    assert_eq!(written, json!({"posts": [1, 2]}));
}

#[tokio::test]
async fn test_overlapping_globs_yield_each_file_once() {
    let input = create_test_tree(&[("a.txt", "a"), ("b.txt", "b"), ("nested/c.txt", "c")]);
    let output = TempDir::new().unwrap();
    let (cx, _) = context(&input, &output);

    let files = cx.files(vec!["*.txt", "a.txt"]).unwrap();
    let mut ids: Vec<&str> = files.ids().collect();
    ids.sort();
    assert_eq!(ids, vec!["a.txt", "b.txt", "nested/c.txt"]);

    let anchored = cx.files("./*.txt").unwrap();
    assert_eq!(anchored.len(), 2);
}

#[tokio::test]
async fn test_duplicate_entities_are_rejected() {
    let input = create_test_tree(&[("a.txt", "a")]);
    let output = TempDir::new().unwrap();
    let (cx, _) = context(&input, &output);

    let a = cx.file("a.txt").unwrap();
    let err = cx
        .files(vec![Ref::from(a.clone()), Ref::from(a)])
        .err()
        .expect("duplicate ids must fail");
    assert!(matches!(err, BuildError::DuplicateId(id) if id == "a.txt"));
}

#[tokio::test]
async fn test_calls_after_commit_run_immediately() {
    let input = create_test_tree(&[("a.txt", "alpha")]);
    let output = TempDir::new().unwrap();
    let (cx, _) = context(&input, &output);

    let a = cx.file("a.txt").unwrap();
    cx.json_to(&json!({}), "empty.json", false).unwrap();
    cx.commit().await.unwrap();

    let bytes = a.read().await.unwrap();
    assert_eq!(bytes, b"alpha");
}
