#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Whatever parses must serialize and parse back to the same document.
    if let Ok(doc) = shot_config::PersistedSettings::from_toml(data) {
        let Ok(text) = doc.to_toml() else {
            return;
        };
        let back = shot_config::PersistedSettings::from_toml(&text);
        if let Some(o) = doc.offset_g
            && o.is_nan()
        {
            return;
        }
        assert_eq!(back.ok(), Some(doc));
    }
});
