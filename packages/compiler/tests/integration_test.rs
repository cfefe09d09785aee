//! End-to-end tests for the pit compiler.
//!
//! Compiles the fixture pits under `tests/fixtures/` through the library
//! and the `pitc` binary.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use pit_compiler::defines::{parse_defines_file, Defines};
use pit_compiler::dom::{ElementKind, PublisherKind};
use pit_compiler::render::render_model;
use pit_compiler::{CompileError, CompileOptions, PitCompiler, SimpleEvaluator};
use predicates::prelude::*;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures")
}

/// Load fixture file content.
fn load_fixture(name: &str) -> String {
    let path = fixtures_dir().join(name);
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to load {}: {}", path.display(), e))
}

fn fixture_compiler() -> PitCompiler {
    PitCompiler::new().options(CompileOptions::new().with_base_dir(fixtures_dir()))
}

fn http_defines() -> Defines {
    [("HOST", "127.0.0.1"), ("PORT", "8080"), ("BODY", "hello")]
        .into_iter()
        .collect()
}

fn render(text: &str, model: &str) -> Vec<u8> {
    let compiled = PitCompiler::new()
        .compile(text, &Defines::new(), None)
        .unwrap();
    render_model(compiled.dom.find_data_model(model).unwrap(), &SimpleEvaluator).unwrap()
}

#[test]
fn test_http_pit_compiles() {
    let compiled = fixture_compiler()
        .compile(&load_fixture("http.xml"), &http_defines(), Some("http.xml"))
        .unwrap();
    let dom = &compiled.dom;

    assert_eq!(
        dom.data_models.names().collect::<Vec<_>>(),
        vec!["Request", "Response"]
    );
    assert!(dom.find_data_model("common:Header").is_some());
    assert_eq!(dom.python_paths, vec!["shared".to_string()]);

    let exchange = dom.find_state_model("Exchange").unwrap();
    assert_eq!(exchange.states.names().collect::<Vec<_>>(), vec!["Send", "Done"]);

    let test = dom.tests.get("Default").unwrap();
    assert_eq!(test.state_model, "Exchange");
    assert_eq!(test.max_output_size, 65536);
    assert_eq!(test.agents.names().collect::<Vec<_>>(), vec!["Local"]);
    assert_eq!(test.strategy.class, "Random");
    let publisher = test.publishers.get("net").unwrap();
    assert_eq!(publisher.class(), "Tcp");
    let PublisherKind::Local { plugin } = &publisher.kind else {
        panic!("expected a local publisher");
    };
    assert_eq!(plugin.params.get("Host"), Some("127.0.0.1"));
    assert_eq!(plugin.params.get("Port"), Some("8080"));

    assert_eq!(
        compiled.used_defines.into_iter().collect::<Vec<_>>(),
        vec!["BODY", "HOST", "PORT"]
    );
    assert!(compiled.diagnostics.is_empty());
}

#[test]
fn test_http_request_renders_with_relations_and_fixups() {
    let compiled = fixture_compiler()
        .compile(&load_fixture("http.xml"), &http_defines(), None)
        .unwrap();
    let request = compiled.dom.find_data_model("Request").unwrap();
    let bytes = render_model(request, &SimpleEvaluator).unwrap();

    let mut expected = b"GET /index.html".to_vec();
    expected.extend_from_slice(&[0x00, 0x05]);
    expected.extend_from_slice(b"hello");
    // CRC-32 of "hello", big endian from <Defaults>.
    expected.extend_from_slice(&[0x36, 0x10, 0xA6, 0x86]);
    assert_eq!(bytes, expected);
}

#[test]
fn test_defines_file_feeds_compile() {
    let defines = parse_defines_file(&fixtures_dir().join("defines.xml")).unwrap();
    assert_eq!(defines.get("HOST"), Some("127.0.0.1"));
    assert_eq!(defines.get("BODY"), Some("hello"));

    let compiled = fixture_compiler()
        .compile(&load_fixture("http.xml"), &defines, None)
        .unwrap();
    assert_eq!(compiled.used_defines.len(), 3);
}

#[test]
fn test_consumers_see_the_same_values_on_either_side_of_the_producer() {
    let before = render(
        r#"<Peach>
            <DataModel name="M">
                <Number name="len" size="8"><Relation type="size" of="body"/></Number>
                <Number name="crc" size="32">
                    <Fixup class="Crc32Fixup"><Param name="ref" value="body"/></Fixup>
                </Number>
                <Blob name="body" value="hello"/>
            </DataModel>
        </Peach>"#,
        "M",
    );
    let after = render(
        r#"<Peach>
            <DataModel name="M">
                <Blob name="body" value="hello"/>
                <Number name="crc" size="32">
                    <Fixup class="Crc32Fixup"><Param name="ref" value="body"/></Fixup>
                </Number>
                <Number name="len" size="8"><Relation type="size" of="body"/></Number>
            </DataModel>
        </Peach>"#,
        "M",
    );

    assert_eq!(before.len(), 10);
    assert_eq!(after.len(), 10);
    // len
    assert_eq!(before[0], 5);
    assert_eq!(before[0], after[9]);
    // crc
    assert_eq!(before[1..5], after[5..9]);
    // body
    assert_eq!(before[5..], after[..5]);
}

#[test]
fn test_fixup_covers_relation_updated_container_in_either_order() {
    let fixup_first = render(
        r#"<Peach>
            <DataModel name="M">
                <Number name="crc" size="32">
                    <Fixup class="Crc32Fixup"><Param name="ref" value="body"/></Fixup>
                </Number>
                <Block name="body">
                    <Number name="len" size="8"><Relation type="size" of="data"/></Number>
                    <Blob name="data" value="hello"/>
                </Block>
            </DataModel>
        </Peach>"#,
        "M",
    );
    let relation_first = render(
        r#"<Peach>
            <DataModel name="M">
                <Block name="body">
                    <Number name="len" size="8"><Relation type="size" of="data"/></Number>
                    <Blob name="data" value="hello"/>
                </Block>
                <Number name="crc" size="32">
                    <Fixup class="Crc32Fixup"><Param name="ref" value="body"/></Fixup>
                </Number>
            </DataModel>
        </Peach>"#,
        "M",
    );

    // CRC-32 of "\x05hello", little endian by default.
    let crc: [u8; 4] = [0x8B, 0x61, 0x3D, 0x11];
    let body = b"\x05hello";
    assert_eq!(fixup_first[..4], crc);
    assert_eq!(fixup_first[4..], body[..]);
    assert_eq!(relation_first[..6], body[..]);
    assert_eq!(relation_first[6..], crc);
}

#[test]
fn test_arrays_stay_unexpanded_in_the_dom() {
    let compiled = PitCompiler::new()
        .compile(
            r#"<Peach>
                <DataModel name="M">
                    <Number name="items" size="8" value="7" minOccurs="1" maxOccurs="4" occurs="3"/>
                </DataModel>
            </Peach>"#,
            &Defines::new(),
            None,
        )
        .unwrap();

    let mut model = compiled.dom.data_models.get("M").unwrap().clone();
    let element = model.root.children_mut().unwrap().get_mut("items").unwrap();
    let ElementKind::Array(array) = &mut element.kind else {
        panic!("expected an array");
    };
    assert!(!array.is_expanded());
    assert_eq!(
        array.ensure_expanded().names().collect::<Vec<_>>(),
        vec!["items_0", "items_1", "items_2"]
    );

    let bytes = render_model(compiled.dom.data_models.get("M").unwrap(), &SimpleEvaluator).unwrap();
    assert_eq!(bytes, vec![7, 7, 7]);
}

#[test]
fn test_schema_violations_are_collected() {
    let err = fixture_compiler()
        .compile(&load_fixture("invalid.xml"), &Defines::new(), Some("invalid.xml"))
        .unwrap_err();

    let CompileError::Schema { origin, violations } = &err else {
        panic!("expected a schema error, got {err}");
    };
    assert_eq!(origin.as_deref(), Some("invalid.xml"));
    assert_eq!(violations.len(), 2);
    assert_eq!(violations[0].line, 4);
    assert_eq!(violations[0].message, "The 'colour' attribute is not declared.");
    assert_eq!(violations[1].line, 6);
    assert_eq!(violations[1].message, "The required attribute 'name' is missing.");
}

#[test]
fn test_missing_define_leaves_invalid_value() {
    let defines: Defines = [("HOST", "127.0.0.1"), ("BODY", "x")].into_iter().collect();
    let err = fixture_compiler()
        .compile(&load_fixture("http.xml"), &defines, None)
        .unwrap_err();
    // Port stays "##PORT##", which is not an unsigned integer.
    assert!(err.to_string().contains("Port"), "{err}");
}

// CLI

#[allow(deprecated)]
fn pitc() -> Command {
    Command::cargo_bin("pitc").unwrap()
}

fn http_args(command: &str) -> Vec<String> {
    vec![
        command.to_string(),
        fixtures_dir().join("http.xml").display().to_string(),
        "--defines".to_string(),
        fixtures_dir().join("defines.xml").display().to_string(),
    ]
}

#[test]
fn test_cli_validate() {
    pitc()
        .arg("validate")
        .arg(fixtures_dir().join("http.xml"))
        .assert()
        .success()
        .stdout(predicate::str::contains("valid"));

    pitc()
        .arg("validate")
        .arg(fixtures_dir().join("invalid.xml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("The 'colour' attribute is not declared."))
        .stderr(predicate::str::contains("Error: 1 of 1 pit files failed to validate"));
}

#[test]
fn test_cli_validate_full_needs_defines() {
    pitc()
        .args(["validate", "--full"])
        .arg(fixtures_dir().join("http.xml"))
        .assert()
        .failure();

    pitc()
        .args(http_args("validate"))
        .arg("--full")
        .assert()
        .success();
}

#[test]
fn test_cli_parse_json() {
    let output = pitc().args(http_args("parse")).assert().success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();

    assert_eq!(json["usedDefines"], serde_json::json!(["BODY", "HOST", "PORT"]));
    assert!(json["dom"].is_object());
    assert!(json["diagnostics"].as_array().unwrap().is_empty());
}

#[test]
fn test_cli_parse_yaml() {
    pitc()
        .args(http_args("parse"))
        .args(["--format", "yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("usedDefines:"));
}

#[test]
fn test_cli_render_hex_and_file() {
    pitc()
        .args(http_args("render"))
        .args(["--model", "Request"])
        .assert()
        .success()
        .stdout(predicate::str::contains("474554202f696e6465782e68746d6c000568656c6c6f3610a686"));

    let dir = TempDir::new().unwrap();
    let out = dir.path().join("request.bin");
    pitc()
        .args(http_args("render"))
        .args(["--model", "Request", "--output"])
        .arg(&out)
        .assert()
        .success();
    assert_eq!(fs::read(&out).unwrap().len(), 26);

    pitc()
        .args(http_args("render"))
        .args(["--model", "Nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not resolve DataModel 'Nope'"));
}

#[test]
fn test_cli_command_line_define_overrides_file() {
    pitc()
        .args(http_args("render"))
        .args(["--model", "Request", "-D", "BODY=hi"])
        .assert()
        .success()
        .stdout(predicate::str::contains("00026869"));
}
