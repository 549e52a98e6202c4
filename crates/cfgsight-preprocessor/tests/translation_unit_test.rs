//! Integration tests over whole translation units
//!
//! Drives the preprocessor end to end: source plus headers on disk,
//! configuration enumeration and per-configuration expansion.

use cfgsight_core::{CollectSink, Settings};
use cfgsight_preprocessor::Preprocessor;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

/// A small driver-style source with platform branching
const DRIVER_SOURCE: &str = r#"#include "config.h"

#ifdef USE_DMA
static int setup_dma(void);
#else
static int setup_pio(void);
#endif

#define REG(offset) (*(volatile int*)(BASE + (offset)))

int init(void)
{
    int status = REG(0x10);
    return status;
}
"#;

const CONFIG_HEADER: &str = r#"#ifndef CONFIG_H
#define CONFIG_H

#define BASE 0xff000000

#endif
"#;

fn preprocess_tree(
    source: &str,
    headers: &[(&str, &str)],
    settings: Settings,
) -> (std::collections::BTreeMap<String, String>, Arc<CollectSink>) {
    let dir = TempDir::new().unwrap();
    for (name, content) in headers {
        fs::write(dir.path().join(name), content).unwrap();
    }
    let main = dir.path().join("main.c");
    fs::write(&main, source).unwrap();

    let mut settings = settings;
    settings.include_paths.push(dir.path().to_path_buf());

    let sink = Arc::new(CollectSink::new());
    let mut preprocessor = Preprocessor::new(settings, sink.clone());
    let source = fs::read_to_string(&main).unwrap();
    let result = preprocessor.preprocess_source(&source, &main.to_string_lossy().replace('\\', "/"));
    (result, sink)
}

#[test]
fn enumerates_platform_configurations() {
    let (result, _) = preprocess_tree(
        DRIVER_SOURCE,
        &[("config.h", CONFIG_HEADER)],
        Settings::default(),
    );

    let configs: Vec<_> = result.keys().cloned().collect();
    assert_eq!(configs, vec!["".to_string(), "USE_DMA".to_string()]);

    assert!(result[""].contains("setup_pio"));
    assert!(!result[""].contains("setup_dma"));
    assert!(result["USE_DMA"].contains("setup_dma"));
    assert!(!result["USE_DMA"].contains("setup_pio"));
}

#[test]
fn header_contents_carry_provenance() {
    let (result, _) = preprocess_tree(
        DRIVER_SOURCE,
        &[("config.h", CONFIG_HEADER)],
        Settings::default(),
    );

    let code = &result[""];
    assert!(code.contains("#file \""));
    assert!(code.contains("#endfile"));
    assert_eq!(code.matches("#file").count(), code.matches("#endfile").count());
}

#[test]
fn macro_from_header_expands_in_source() {
    let (result, _) = preprocess_tree(
        DRIVER_SOURCE,
        &[("config.h", CONFIG_HEADER)],
        Settings::default(),
    );

    // REG(0x10) uses BASE defined in config.h
    let code = &result[""];
    assert!(code.contains("0xff000000"));
    assert!(code.contains("0x10"));
}

#[test]
fn missing_header_is_tolerated() {
    let (result, _) = preprocess_tree(
        "#include \"gone.h\"\nint x;\n",
        &[],
        Settings::default(),
    );
    // the directive becomes a blank line and the rest is preprocessed
    assert!(result[""].contains("int x;"));
    assert_eq!(result[""].matches('\n').count(), 2);
}

#[test]
fn include_cycle_yields_one_file_marker_pair() {
    let (result, _) = preprocess_tree(
        "#include \"a.h\"\nint m;\n",
        &[
            ("a.h", "#include \"b.h\"\nint a;\n"),
            ("b.h", "#include \"a.h\"\nint b;\n"),
        ],
        Settings::default(),
    );

    let code = &result[""];
    assert_eq!(code.matches("int a;").count(), 1);
    assert_eq!(code.matches("int b;").count(), 1);
    assert_eq!(code.matches("#file").count(), 2);
    assert_eq!(code.matches("#endfile").count(), 2);
}

// the scenarios from the module documentation, driven end to end

#[test]
fn scenario_defined_macro_selects_then_branch() {
    let (result, _) = preprocess_tree(
        "#define A\n#ifdef A\nx\n#else\ny\n#endif\n",
        &[],
        Settings::default(),
    );
    assert_eq!(result.keys().collect::<Vec<_>>(), vec![""]);
    assert!(result[""].contains('x'));
    assert!(!result[""].contains('y'));
}

#[test]
fn scenario_undefined_macro_enumerates_both() {
    let (result, _) = preprocess_tree(
        "#ifdef A\nx\n#else\ny\n#endif\n",
        &[],
        Settings::default(),
    );
    assert_eq!(
        result.keys().cloned().collect::<Vec<_>>(),
        vec!["".to_string(), "A".to_string()]
    );
    assert!(result[""].contains('y'));
    assert!(result["A"].contains('x'));
}

#[test]
fn scenario_function_macro_expansion() {
    let (result, _) = preprocess_tree(
        "#define SQR(x) ((x)*(x))\nint y = SQR(1+2);\n",
        &[],
        Settings::default(),
    );
    assert!(result[""].contains("((1+2)*(1+2))"));
}

#[test]
fn scenario_stringification() {
    let (result, _) = preprocess_tree(
        "#define STR(x) #x\nconst char *s = STR(hello);\n",
        &[],
        Settings::default(),
    );
    assert!(result[""].contains("\"hello\""));
}

#[test]
fn scenario_token_pasting() {
    let (result, _) = preprocess_tree(
        "#define CAT(a,b) a##b\nint CAT(foo,bar);\n",
        &[],
        Settings::default(),
    );
    assert!(result[""].contains("foobar"));
}

#[test]
fn scenario_raw_string_rewritten() {
    let source = "const char *s = R\"xx(line1\nline2)xx\";\nint after;\n";
    let (result, _) = preprocess_tree(source, &[], Settings::default());

    let code = &result[""];
    assert!(code.contains("line1\\nline2"));
    // line count preserved: "int after;" still on its own later line
    assert!(code.contains("int after;"));
    assert_eq!(code.matches('\n').count(), source.matches('\n').count());
}

#[test]
fn scenario_conjunction_configuration() {
    let (result, _) = preprocess_tree(
        "#if defined A && defined B\nboth\n#endif\nint tail;\n",
        &[],
        Settings::default(),
    );
    assert!(result.contains_key("A;B"));
    assert!(result["A;B"].contains("both"));
    assert!(!result[""].contains("both"));
}

#[test]
fn line_counts_survive_the_whole_pipeline() {
    let source = "#ifdef A\nint a;\n#endif\n/* multi\nline\ncomment */\nint z = 1; // trailing\n";
    let (result, _) = preprocess_tree(source, &[], Settings::default());

    for code in result.values() {
        assert_eq!(code.matches('\n').count(), source.matches('\n').count());
    }
}

#[test]
fn enumeration_of_selected_output_shrinks() {
    // preprocessing under a configuration must not invent new ones
    let source = "#ifdef A\n#ifdef B\nint ab;\n#endif\n#endif\nint tail;\n";
    let sink = Arc::new(CollectSink::new());
    let mut preprocessor = Preprocessor::new(Settings::default(), sink.clone());
    let (data, configs) = preprocessor.scan(source, "test.c");

    let selected = preprocessor.get_code(&data, "", "test.c");

    let sink2 = Arc::new(CollectSink::new());
    let mut preprocessor2 = Preprocessor::new(Settings::default(), sink2);
    let (_, configs2) = preprocessor2.scan(&selected, "test.c");

    for cfg in &configs2 {
        assert!(configs.contains(cfg), "unexpected configuration {:?}", cfg);
    }
}
