use arbitrary::Unstructured;
use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use super::*;

#[test]
fn test_config_validate() {
    let config = Config::new();
    config.validate().unwrap();

    let mut config = Config::new();
    config.set_chunk_size(MIN_CHUNK_SIZE - 1);
    assert!(config.validate().is_err());
    config.set_chunk_size(MAX_CHUNK_SIZE + 1);
    assert!(config.validate().is_err());

    let mut config = Config::new();
    config.set_target_size(MIN_TARGET_SIZE - 1);
    assert!(config.validate().is_err());

    let mut config = Config::new();
    config.set_chunk_size(MAX_CHUNK_SIZE).set_target_size(MAX_CHUNK_SIZE);
    assert!(config.validate().is_err());
    assert!(config.check().is_ok());

    let mut config = Config::new();
    config.set_freelist_limit(0);
    assert!(config.validate().is_err());
    let mut config = Config::new();
    config.set_compact_ratio(1.5);
    assert!(config.check().is_err());
}

#[test]
fn test_config_arbitrary() {
    let seed: u64 = random();
    println!("test_config_arbitrary seed:{}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    for _i in 0..100 {
        let config: Config = {
            let bytes = rng.gen::<[u8; 32]>();
            let mut uns = Unstructured::new(&bytes);
            uns.arbitrary().unwrap()
        };
        config.check().unwrap();
    }
}

#[test]
fn test_config_toml() {
    let text = r#"
        chunk_size = 1048576
        target_size = 33554432
        promote_wal_reads = false
    "#;
    let config = Config::from_toml(text).unwrap();
    assert_eq!(config.chunk_size, 1048576);
    assert_eq!(config.target_size, 33554432);
    assert_eq!(config.freelist_limit, FREELIST_LIMIT);
    assert_eq!(config.promote_wal_reads, false);

    let config = Config::from_toml("").unwrap();
    assert_eq!(config.chunk_size, CHUNK_SIZE);

    assert!(Config::from_toml("chunk_size = 1024").is_err());
    assert!(Config::from_toml("chunk_size = \"big\"").is_err());
}

#[test]
fn test_config_load() {
    use std::{env, fs};

    let loc = env::temp_dir().join("test-revcache-config.toml");
    fs::write(&loc, "target_size = 134217728\n").unwrap();
    let config = Config::load(loc.as_os_str()).unwrap();
    assert_eq!(config.target_size, 134217728);
    fs::remove_file(&loc).ok();

    let loc = env::temp_dir().join("test-revcache-config-missing.toml");
    assert!(Config::load(loc.as_os_str()).is_err());
}
