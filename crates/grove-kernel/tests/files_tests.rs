//! File trees over real directories, and change notification.

mod common;

use std::sync::Arc;
use std::time::Duration;

use grove_kernel::{FileTree, FileWatcher, GroveConfig, Key, MutableTree, ObjectTree, Tree, TreeError, TreeRef, Value, ops};
use rstest::rstest;
use serde_json::json;

fn file_tree(label: &str, files: &[(&str, &str)]) -> (std::path::PathBuf, Arc<FileTree>) {
    let dir = common::temp_dir(label);
    common::write_files(&dir, files);
    let tree = FileTree::new(&dir, GroveConfig::default().shared());
    (dir, tree)
}

// ============================================================================
// Reading
// ============================================================================

#[tokio::test]
async fn test_keys_sort_naturally() {
    let (dir, tree) = file_tree("natural", &[("file10", ""), ("file1", ""), ("file9", "")]);
    assert_eq!(tree.keys().await.unwrap(), ["file1", "file9", "file10"]);
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_hidden_names_and_subdirectories() {
    let (dir, tree) = file_tree("listing", &[(".DS_Store", ""), ("a.txt", "A"), ("sub/b.txt", "B")]);
    assert_eq!(tree.keys().await.unwrap(), ["a.txt", "sub/"]);
    assert!(tree.is_key_for_subtree("sub").await.unwrap());
    assert!(!tree.is_key_for_subtree("a.txt").await.unwrap());
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_values_by_loader() {
    let (dir, tree) = file_tree("values", &[("a.md", "# A"), ("data.json", r#"{"n": 1}"#), ("blob.bin", "raw")]);
    let root: TreeRef = tree.clone();

    let Some(Value::Packed(md)) = tree.get(&Key::from("a.md")).await.unwrap() else {
        panic!("markdown should be packed");
    };
    assert_eq!(md.text(), "# A");
    assert!(matches!(
        tree.get(&Key::from("blob.bin")).await.unwrap(),
        Some(Value::Bytes(bytes)) if bytes == b"raw"
    ));
    // Traversal unpacks JSON on the way down.
    let n = ops::traverse_path(&root, "data.json/n").await.unwrap();
    assert!(matches!(n, Some(Value::Int(1))));
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_missing_and_default_keys() {
    let (dir, tree) = file_tree("missing", &[("a.txt", "A")]);
    assert!(tree.get(&Key::from("nope.txt")).await.unwrap().is_none());
    assert!(tree.get(&Key::from("a.txt/")).await.unwrap().is_none());
    let Some(Value::Tree(itself)) = tree.get(&Key::Default).await.unwrap() else {
        panic!("the default key should return the tree");
    };
    assert_eq!(itself.kind(), "FileTree");
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_subtrees_are_cached_with_parent() {
    let (dir, tree) = file_tree("cache", &[("sub/x.txt", "X")]);
    let Some(Value::Tree(first)) = tree.get(&Key::from("sub/")).await.unwrap() else {
        panic!("sub should be a tree");
    };
    let Some(Value::Tree(second)) = tree.get(&Key::from("sub")).await.unwrap() else {
        panic!("sub should be a tree");
    };
    assert!(Arc::ptr_eq(&first, &second));
    assert!(first.parent().is_some());

    tree.on_change("sub");
    let Some(Value::Tree(third)) = tree.get(&Key::from("sub")).await.unwrap() else {
        panic!("sub should be a tree");
    };
    assert!(!Arc::ptr_eq(&first, &third));
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_import() {
    let (dir, tree) = file_tree("import", &[("good.json", r#"{"a": [1, 2]}"#), ("bad.json", "{nope")]);
    assert!(tree.import("absent.json").await.unwrap().is_none());

    let Some(Value::Tree(good)) = tree.import("good.json").await.unwrap() else {
        panic!("json should import as a tree");
    };
    assert_eq!(ops::plain(good).await.unwrap(), json!({"a": [1, 2]}));

    let err = tree.import("bad.json").await.unwrap_err();
    assert!(matches!(err, TreeError::Load { .. }), "{err}");
    assert!(matches!(err.root_cause(), TreeError::Json(_)));
    let _ = std::fs::remove_dir_all(&dir);
}

// ============================================================================
// Writing
// ============================================================================

#[tokio::test]
async fn test_write_and_delete_files() {
    let (dir, tree) = file_tree("write", &[]);
    tree.set("note.txt", Some(Value::from("hello"))).await.unwrap();
    assert_eq!(std::fs::read_to_string(dir.join("note.txt")).unwrap(), "hello");

    tree.set("note.txt", None).await.unwrap();
    assert!(!dir.join("note.txt").exists());
    // Deleting again is not an error.
    tree.set("note.txt", None).await.unwrap();
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_write_tree_as_directory() {
    let (dir, tree) = file_tree("write-tree", &[]);
    let site: TreeRef = ObjectTree::from_json(&json!({
        "index.html": "home",
        "posts": {"one.md": "1", "two.md": "2"},
    }));
    tree.set("site/", Some(Value::Tree(site))).await.unwrap();
    assert_eq!(std::fs::read_to_string(dir.join("site/posts/two.md")).unwrap(), "2");

    let root: TreeRef = tree.clone();
    let posts = ops::traverse_path(&root, "site/posts/").await.unwrap();
    let Some(Value::Tree(posts)) = posts else {
        panic!("posts should be a tree");
    };
    assert_eq!(posts.keys().await.unwrap(), ["one.md", "two.md"]);

    tree.set("site", None).await.unwrap();
    assert!(!dir.join("site").exists());
    let _ = std::fs::remove_dir_all(&dir);
}

#[rstest]
#[case::json("data.json")]
#[case::yaml("data.yaml")]
#[tokio::test]
async fn test_write_tree_as_data_file(#[case] name: &str) {
    let (dir, tree) = file_tree("write-data", &[]);
    let data: TreeRef = ObjectTree::from_json(&json!({"a": 1, "list": ["x", "y"]}));
    tree.set(name, Some(Value::Tree(data))).await.unwrap();

    let path = dir.join(name);
    assert!(path.is_file(), "{name} should be a file");
    let root: TreeRef = tree.clone();
    let n = ops::traverse_path(&root, &format!("{name}/a")).await.unwrap();
    assert!(matches!(n, Some(Value::Int(1))));
    let Some(Value::Tree(loaded)) = tree.import(name).await.unwrap() else {
        panic!("{name} should load as a tree");
    };
    assert_eq!(ops::plain(loaded).await.unwrap(), json!({"a": 1, "list": ["x", "y"]}));
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_names_with_slashes_are_rejected() {
    let (dir, tree) = file_tree("slash", &[]);
    let err = tree.get(&Key::from("a/b.txt")).await.unwrap_err();
    assert!(matches!(err, TreeError::Io { .. }));
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_set_notifies_subscribers() {
    let (dir, tree) = file_tree("notify", &[]);
    let mut changes = tree.subscribe().unwrap();
    tree.set("a.txt", Some(Value::from("A"))).await.unwrap();
    assert_eq!(changes.recv().await.unwrap(), "a.txt");
    let _ = std::fs::remove_dir_all(&dir);
}

// ============================================================================
// Watching
// ============================================================================

#[tokio::test]
async fn test_watcher_reports_external_changes() {
    let (dir, tree) = file_tree("watch", &[("a.txt", "A")]);
    let watcher = Arc::new(FileWatcher::new());
    watcher.start().unwrap();
    tree.watch(watcher.clone()).await.unwrap();
    assert!(tree.is_watching());
    assert_eq!(watcher.registration_count(), 1);

    let mut changes = tree.subscribe().unwrap();
    std::fs::write(dir.join("b.txt"), "B").unwrap();

    let seen = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match changes.recv().await {
                Ok(name) if name == "b.txt" => return true,
                Ok(_) => continue,
                Err(_) => return false,
            }
        }
    })
    .await;
    assert_eq!(seen, Ok(true));

    tree.unwatch().unwrap();
    assert!(!tree.is_watching());
    assert_eq!(watcher.registration_count(), 0);
    watcher.stop();
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_dropped_tree_is_pruned() {
    let (dir, tree) = file_tree("prune", &[]);
    let watcher = Arc::new(FileWatcher::new());
    watcher.start().unwrap();
    tree.watch(watcher.clone()).await.unwrap();
    drop(tree);

    std::fs::write(dir.join("c.txt"), "C").unwrap();
    let pruned = tokio::time::timeout(Duration::from_secs(10), async {
        while watcher.registration_count() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(pruned.is_ok(), "registration for a dropped tree should be pruned");
    watcher.stop();
    let _ = std::fs::remove_dir_all(&dir);
}
