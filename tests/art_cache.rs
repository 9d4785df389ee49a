/*
 *  tests/art_cache.rs
 *
 *  Cover art cache against a real directory
 *
 *  RGBClock - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 */

use std::time::Duration;

use rgbclock::artcache::ArtCache;
use rgbclock::bitmap::Bitmap;
use rgbclock::color::Rgba;

const DAY: Duration = Duration::from_secs(86_400);

#[test]
fn covers_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let cover = Bitmap::filled(12, 12, Rgba::RED);
    {
        let cache = ArtCache::with_limits(dir.path(), DAY, 8, 1 << 20).unwrap();
        cache.set_image("cover-1", &cover).unwrap();
        assert!(cache.contains("cover-1"));
    }

    let cache = ArtCache::with_limits(dir.path(), DAY, 8, 1 << 20).unwrap();
    assert!(!cache.contains("cover-1"));
    let back = cache.get_image("cover-1").unwrap();
    assert_eq!(back.dimensions(), (12, 12));
    assert_eq!(back.pixel(3, 3), Rgba::RED);
    assert!(cache.contains("cover-1"));
    assert_eq!(cache.cleanup().unwrap(), 0);
}

#[test]
fn least_recent_cover_goes_first() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtCache::with_limits(dir.path(), DAY, 2, 1 << 20).unwrap();
    cache.set("a", b"aaaa").unwrap();
    cache.set("b", b"bbbb").unwrap();
    assert_eq!(cache.get("a").as_deref(), Some(&b"aaaa"[..]));
    cache.set("c", b"cccc").unwrap();

    assert_eq!(cache.len(), 2);
    assert!(cache.contains("a") && cache.contains("c"));
    assert!(!cache.contains("b"));
    assert!(!cache.path_for("b").exists());
    assert_eq!(cache.total_bytes(), 8);
}

#[test]
fn odd_keys_stay_inside_the_directory() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtCache::new(dir.path()).unwrap();
    let path = cache.path_for("../../etc/passwd");
    assert_eq!(path.parent(), Some(dir.path()));
    cache.set("../../etc/passwd", b"x").unwrap();
    assert_eq!(cache.get("../../etc/passwd").as_deref(), Some(&b"x"[..]));
}
