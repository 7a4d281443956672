use std::time::Duration;

use devenv_file_watcher::{AtomicOption, AwaitWriteFinish, FsEvent, WatchOptions, Watcher};
use tempfile::tempdir;
use tokio::sync::broadcast::Receiver;
use tokio::time::timeout;

async fn recv(rx: &mut Receiver<FsEvent>) -> FsEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}

async fn wait_ready(watcher: &Watcher) {
    let mut ready_rx = watcher.subscribe_ready();
    timeout(Duration::from_secs(5), ready_rx.recv()).await.unwrap().unwrap();
}

#[tokio::test]
async fn detects_new_file_and_subsequent_change() {
    let dir = tempdir().unwrap();
    let watcher = Watcher::new(WatchOptions { ignore_initial: true, ..Default::default() });
    watcher.add(vec![dir.path().to_string_lossy().to_string()]).await.unwrap();
    wait_ready(&watcher).await;

    let mut add_rx = watcher.subscribe_add();
    let mut change_rx = watcher.subscribe_change();

    let file = dir.path().join("a.txt");
    std::fs::write(&file, "hello").unwrap();
    assert_eq!(recv(&mut add_rx).await.path, file);

    std::fs::write(&file, "hello world").unwrap();
    assert_eq!(recv(&mut change_rx).await.path, file);

    watcher.close().await.unwrap();
}

#[tokio::test]
async fn atomic_save_reconciles_unlink_add_into_change() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("config.toml");
    std::fs::write(&file, "orig").unwrap();

    let watcher = Watcher::new(WatchOptions {
        ignore_initial: true,
        atomic: AtomicOption::Enabled,
        ..Default::default()
    });
    watcher.add(vec![dir.path().to_string_lossy().to_string()]).await.unwrap();
    wait_ready(&watcher).await;

    let mut change_rx = watcher.subscribe_change();
    let mut unlink_rx = watcher.subscribe_unlink();

    let tmp = dir.path().join("config.toml.tmp");
    std::fs::write(&tmp, "new").unwrap();
    std::fs::remove_file(&file).unwrap();
    std::fs::rename(&tmp, &file).unwrap();

    assert_eq!(recv(&mut change_rx).await.path, file);
    assert!(unlink_rx.try_recv().is_err());

    watcher.close().await.unwrap();
}

#[tokio::test]
async fn write_stabilization_waits_for_growth_to_stop() {
    let dir = tempdir().unwrap();
    let watcher = Watcher::new(WatchOptions {
        ignore_initial: true,
        await_write_finish: Some(AwaitWriteFinish {
            stability_threshold: Duration::from_millis(150),
            poll_interval: Duration::from_millis(30),
        }),
        ..Default::default()
    });
    watcher.add(vec![dir.path().to_string_lossy().to_string()]).await.unwrap();
    wait_ready(&watcher).await;

    let mut add_rx = watcher.subscribe_add();
    let file = dir.path().join("growing.log");
    let start = std::time::Instant::now();
    std::fs::write(&file, "a").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    std::fs::write(&file, "ab").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    std::fs::write(&file, "abc").unwrap();

    assert_eq!(recv(&mut add_rx).await.path, file);
    assert!(start.elapsed() >= Duration::from_millis(150));

    watcher.close().await.unwrap();
}

#[tokio::test]
async fn glob_pattern_filters_non_matching_files() {
    let dir = tempdir().unwrap();
    let watcher = Watcher::new(WatchOptions { ignore_initial: true, ..Default::default() });
    let pattern = format!("{}/**/*.rs", dir.path().to_string_lossy());
    watcher.add(vec![pattern]).await.unwrap();
    wait_ready(&watcher).await;

    let mut add_rx = watcher.subscribe_add();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
    std::fs::write(dir.path().join("lib.rs"), "fn main() {}").unwrap();

    assert_eq!(recv(&mut add_rx).await.path, dir.path().join("lib.rs"));

    watcher.close().await.unwrap();
}

#[tokio::test]
async fn negation_pattern_ignores_subdirectory() {
    let dir = tempdir().unwrap();
    let skip_dir = dir.path().join("skip");
    std::fs::create_dir(&skip_dir).unwrap();

    let watcher = Watcher::new(WatchOptions { ignore_initial: true, ..Default::default() });
    let negate = format!("!{}", skip_dir.to_string_lossy());
    watcher
        .add(vec![dir.path().to_string_lossy().to_string(), negate])
        .await
        .unwrap();
    wait_ready(&watcher).await;

    let mut add_rx = watcher.subscribe_add();
    std::fs::write(skip_dir.join("ignored.txt"), "x").unwrap();
    std::fs::write(dir.path().join("kept.txt"), "y").unwrap();

    assert_eq!(recv(&mut add_rx).await.path, dir.path().join("kept.txt"));

    watcher.close().await.unwrap();
}

#[tokio::test]
async fn unwatch_recursively_retires_subtree() {
    let dir = tempdir().unwrap();
    let nested = dir.path().join("nested");
    std::fs::create_dir(&nested).unwrap();
    std::fs::write(nested.join("f.txt"), "x").unwrap();

    let watcher = Watcher::new(WatchOptions::default());
    watcher.add(vec![dir.path().to_string_lossy().to_string()]).await.unwrap();
    wait_ready(&watcher).await;

    let mut unlink_rx = watcher.subscribe_unlink();
    let mut unlink_dir_rx = watcher.subscribe_unlink_dir();

    watcher.unwatch(vec![dir.path().to_string_lossy().to_string()]).await.unwrap();

    assert_eq!(recv(&mut unlink_rx).await.path, nested.join("f.txt"));
    assert_eq!(recv(&mut unlink_dir_rx).await.path, nested);

    watcher.close().await.unwrap();
}

#[tokio::test]
async fn get_watched_reflects_registered_tree() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("x.txt"), "x").unwrap();

    let watcher = Watcher::new(WatchOptions::default());
    watcher.add(vec![dir.path().to_string_lossy().to_string()]).await.unwrap();
    wait_ready(&watcher).await;

    let snapshot = watcher.get_watched().await.unwrap();
    let root_entry = snapshot.iter().find(|(path, _)| path == dir.path());
    assert!(root_entry.is_some());
    assert!(root_entry.unwrap().1.contains(&"x.txt".to_string()));

    watcher.close().await.unwrap();
}
