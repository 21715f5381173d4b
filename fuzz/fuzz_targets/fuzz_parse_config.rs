#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes interpreted as a YAML document
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Parsing and validation must never panic, whatever the input
    if let Ok(config) = helion::config::Config::from_yaml_str(text) {
        let _ = config.validate();
        let _ = helion::circuit::build_circuits(&config.circuits);
    }
});
