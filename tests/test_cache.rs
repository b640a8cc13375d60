use std::fs::File;
use std::io::Read;
use std::time::{Duration, SystemTime};

use edgeserve::cache::{CacheError, CacheView, FileCache};
use flate2::read::GzDecoder;

fn set_mtime(path: &std::path::Path, mtime: SystemTime) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(mtime)
        .unwrap();
}

#[test]
fn test_second_lookup_serves_same_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.txt");
    std::fs::write(&path, "hello cache").unwrap();
    let cache = FileCache::new(1 << 20);

    let first = cache.get(&path, false).unwrap().bytes().unwrap().to_vec();
    let second = cache.get(&path, false).unwrap().bytes().unwrap().to_vec();

    assert_eq!(first, b"hello cache");
    assert_eq!(first, second);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_changed_file_is_reread() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("page.html");
    let cache = FileCache::new(1 << 20);
    let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);

    std::fs::write(&path, "version one").unwrap();
    set_mtime(&path, t0);
    assert_eq!(cache.get(&path, false).unwrap().bytes().unwrap(), b"version one");

    std::fs::write(&path, "version two").unwrap();
    set_mtime(&path, t0 + Duration::from_secs(5));
    assert_eq!(cache.get(&path, false).unwrap().bytes().unwrap(), b"version two");
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_gzip_variant_decodes_to_original() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("main.js");
    let original = "console.log('hi');\n".repeat(200);
    std::fs::write(&path, &original).unwrap();
    let cache = FileCache::new(1 << 20);

    let view = cache.get(&path, true).unwrap();
    assert!(view.is_gzip());
    assert!(view.len() < original.len() as u64);

    let mut decoded = String::new();
    GzDecoder::new(view.bytes().unwrap())
        .read_to_string(&mut decoded)
        .unwrap();
    assert_eq!(decoded, original);
    drop(view);

    let raw = cache.get(&path, false).unwrap();
    assert!(!raw.is_gzip());
    assert_eq!(raw.bytes().unwrap(), original.as_bytes());
}

#[test]
fn test_large_file_is_streamed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.bin");
    std::fs::write(&path, vec![7u8; 4096]).unwrap();
    let cache = FileCache::new(1024);

    match cache.get(&path, true).unwrap() {
        CacheView::Uncached { mut file, len } => {
            assert_eq!(len, 4096);
            let mut data = Vec::new();
            file.read_to_end(&mut data).unwrap();
            assert_eq!(data, vec![7u8; 4096]);
        }
        _ => panic!("expected an uncached view"),
    }
    assert!(cache.is_empty());
}

#[test]
fn test_empty_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.txt");
    std::fs::write(&path, "").unwrap();
    let cache = FileCache::new(1 << 20);

    let view = cache.get(&path, true).unwrap();
    assert!(matches!(view, CacheView::Empty));
    assert!(view.is_empty());
    assert!(!view.is_gzip());
}

#[test]
fn test_directory_is_not_regular() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FileCache::new(1 << 20);

    let err = cache.get(dir.path(), false).err().unwrap();
    assert!(matches!(err, CacheError::NotRegular(_)));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FileCache::new(1 << 20);

    let err = cache.get(&dir.path().join("nope"), false).err().unwrap();
    match err {
        CacheError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
        other => panic!("unexpected {other}"),
    }
}

#[test]
fn test_concurrent_readers_see_whole_versions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("live.txt");
    let versions = [
        "first version ".repeat(64).into_bytes(),
        "second, longer version ".repeat(80).into_bytes(),
    ];
    let cache = FileCache::new(1 << 20);
    let base = SystemTime::UNIX_EPOCH + Duration::from_secs(2_000_000);

    std::fs::write(&path, &versions[0]).unwrap();
    set_mtime(&path, base);

    std::thread::scope(|s| {
        s.spawn(|| {
            for i in 1..200u64 {
                let staged = dir.path().join("live.txt.next");
                std::fs::write(&staged, &versions[(i % 2) as usize]).unwrap();
                set_mtime(&staged, base + Duration::from_secs(i));
                std::fs::rename(&staged, &path).unwrap();
            }
        });

        for reader in 0..4 {
            let (cache, path, versions) = (&cache, &path, &versions);
            s.spawn(move || {
                for i in 0..300 {
                    let want_gzip = (reader + i) % 2 == 0;
                    let view = cache.get(path, want_gzip).unwrap();
                    let bytes = view.bytes().unwrap();
                    let content = if view.is_gzip() {
                        let mut out = Vec::new();
                        GzDecoder::new(bytes).read_to_end(&mut out).unwrap();
                        out
                    } else {
                        bytes.to_vec()
                    };
                    assert!(versions.contains(&content), "torn read of {} bytes", content.len());
                }
            });
        }
    });

    assert_eq!(cache.len(), 1);
}
