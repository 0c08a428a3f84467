use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const KEY_VARS: &[&str] = &[
    "BRAVE_API_KEY",
    "OPENAI_API_KEY",
    "OPENROUTER_API_KEY",
    "DEEPSEEK_API_KEY",
    "RUST_LOG",
];

fn wsa_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("wsa");
    path
}

fn setup_test_env(bind: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[store]
path = "{}/data/results.json"

[search]
provider = "disabled"

[enrich]
mode = "disabled"

[llm]
provider = "disabled"

[server]
bind = "{}"

[logging]
level = "warn"
"#,
        root.display(),
        bind
    );

    let config_path = config_dir.join("wsa.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn wsa_command(config_path: &Path) -> Command {
    let mut cmd = Command::new(wsa_binary());
    for var in KEY_VARS {
        cmd.env_remove(var);
    }
    cmd.arg("--config").arg(config_path.to_str().unwrap());
    cmd
}

fn run_wsa(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = wsa_command(config_path)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run wsa binary at {:?}: {}", wsa_binary(), e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn store_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("data/results.json")
}

fn write_import(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

const BATCH_AB: &str = r#"[
  {"url": "https://a.com", "title": "A", "description": "first"},
  {"url": "https://b.com/page/", "title": "B"},
  {"url": "https://a.com/#top", "title": "A duplicate"}
]"#;

#[test]
fn test_list_missing_store_is_empty() {
    let (_tmp, config_path) = setup_test_env("127.0.0.1:0");

    let (stdout, stderr, success) = run_wsa(&config_path, &["results", "list", "--json"]);
    assert!(success, "list failed: stderr={}", stderr);
    assert_eq!(stdout.trim(), "[]");
}

#[test]
fn test_import_then_list() {
    let (tmp, config_path) = setup_test_env("127.0.0.1:0");
    let file = write_import(tmp.path(), "batch.json", BATCH_AB);

    let (stdout, stderr, success) =
        run_wsa(&config_path, &["results", "import", file.to_str().unwrap()]);
    assert!(success, "import failed: stderr={}", stderr);
    assert!(stdout.contains("added: 2"));
    assert!(stdout.contains("duplicates: 1"));

    let (stdout, _, success) = run_wsa(&config_path, &["results", "list", "--json"]);
    assert!(success);
    let results: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let urls: Vec<_> = results
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["url"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(urls, vec!["https://a.com", "https://b.com/page/"]);
    assert_eq!(results[0]["snippet"], "first");
}

#[test]
fn test_import_is_idempotent() {
    let (tmp, config_path) = setup_test_env("127.0.0.1:0");
    let file = write_import(tmp.path(), "batch.json", BATCH_AB);

    run_wsa(&config_path, &["results", "import", file.to_str().unwrap()]);
    let before = fs::read(store_path(&config_path)).unwrap();

    let (stdout, _, success) =
        run_wsa(&config_path, &["results", "import", file.to_str().unwrap(), "--json"]);
    assert!(success);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["added"], 0);
    assert_eq!(report["total"], 2);

    // The rewrite keeps every record, timestamps included.
    let after: serde_json::Value =
        serde_json::from_slice(&fs::read(store_path(&config_path)).unwrap()).unwrap();
    let before: serde_json::Value = serde_json::from_slice(&before).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_import_reports_invalid_records() {
    let (tmp, config_path) = setup_test_env("127.0.0.1:0");
    let file = write_import(
        tmp.path(),
        "mixed.json",
        r#"[{"title": "no url"}, {"url": "https://ok.com", "title": "ok"}, {"url": "relative/path"}]"#,
    );

    let (stdout, stderr, success) = run_wsa(
        &config_path,
        &["results", "import", file.to_str().unwrap(), "--json"],
    );
    assert!(success, "import failed: stderr={}", stderr);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["added"], 1);
    assert_eq!(report["rejected"].as_array().unwrap().len(), 2);
}

#[test]
fn test_corrupt_store_lists_empty_and_recovers_on_import() {
    let (tmp, config_path) = setup_test_env("127.0.0.1:0");
    let store = store_path(&config_path);
    fs::create_dir_all(store.parent().unwrap()).unwrap();
    fs::write(&store, "{ this is not json").unwrap();

    let (stdout, _, success) = run_wsa(&config_path, &["results", "list", "--json"]);
    assert!(success);
    assert_eq!(stdout.trim(), "[]");

    let file = write_import(tmp.path(), "batch.json", BATCH_AB);
    let (_, stderr, success) =
        run_wsa(&config_path, &["results", "import", file.to_str().unwrap()]);
    assert!(success, "import failed: stderr={}", stderr);

    let backups = fs::read_dir(store.parent().unwrap())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
        .count();
    assert_eq!(backups, 1);
}

#[test]
fn test_list_limit_shows_most_recent() {
    let (tmp, config_path) = setup_test_env("127.0.0.1:0");
    let file = write_import(tmp.path(), "batch.json", BATCH_AB);
    run_wsa(&config_path, &["results", "import", file.to_str().unwrap()]);

    let (stdout, _, success) = run_wsa(&config_path, &["results", "list", "--limit", "1"]);
    assert!(success);
    assert!(stdout.contains("https://b.com/page/"));
    assert!(!stdout.contains("https://a.com\n"));
    assert!(stdout.contains("1 of 2 results shown."));
}

#[test]
fn test_import_rejects_invalid_json_file() {
    let (tmp, config_path) = setup_test_env("127.0.0.1:0");
    let file = write_import(tmp.path(), "bad.json", "not json");

    let (_, stderr, success) =
        run_wsa(&config_path, &["results", "import", file.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("not valid JSON"));
}

#[test]
fn test_status_json() {
    let (_tmp, config_path) = setup_test_env("127.0.0.1:0");

    let (stdout, stderr, success) = run_wsa(&config_path, &["status", "--json"]);
    assert!(success, "status failed: stderr={}", stderr);
    let status: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(status["provider"], "disabled");
    assert_eq!(status["search_tool"], "disabled");
    assert_eq!(status["stored_records"], 0);
}

#[test]
fn test_ask_without_search_or_model_still_answers() {
    let (_tmp, config_path) = setup_test_env("127.0.0.1:0");

    let (stdout, stderr, success) = run_wsa(&config_path, &["ask", "what is rust?", "--json"]);
    assert!(success, "ask failed: stderr={}", stderr);
    let answer: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert!(answer["sources"].as_array().unwrap().is_empty());
    assert!(answer["notices"][0]
        .as_str()
        .unwrap()
        .contains("web search is disabled"));
}

#[test]
fn test_chat_repl_commands() {
    use std::io::Write;

    let (_tmp, config_path) = setup_test_env("127.0.0.1:0");
    let mut child = wsa_command(&config_path)
        .arg("chat")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"status\nclear\nquit\nnever reached\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("provider:    disabled"));
    assert!(stdout.contains("History cleared"));
}

#[test]
fn test_completions_need_no_config() {
    let output = Command::new(wsa_binary())
        .args(["--config", "/nonexistent/wsa.toml", "completions", "bash"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("wsa"));
}

#[test]
fn test_invalid_config_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("wsa.toml");
    fs::write(&config_path, "[search]\nmax_results = 0\n").unwrap();

    let (_, stderr, success) = run_wsa(&config_path, &["results", "list"]);
    assert!(!success);
    assert!(stderr.contains("max_results"));
}

// ============ wsa serve ============

struct ServerGuard(Child);

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn start_server(config_path: &Path, base: &str) -> ServerGuard {
    let child = wsa_command(config_path)
        .arg("serve")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let guard = ServerGuard(child);

    let client = reqwest::blocking::Client::new();
    let deadline = Instant::now() + Duration::from_secs(15);
    while Instant::now() < deadline {
        if client.get(format!("{}/health", base)).send().is_ok() {
            return guard;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    panic!("wsa serve did not come up at {}", base);
}

#[test]
fn test_serve_results_and_validation() {
    let bind = format!("127.0.0.1:{}", free_port());
    let base = format!("http://{}", bind);
    let (tmp, config_path) = setup_test_env(&bind);
    let file = write_import(tmp.path(), "batch.json", BATCH_AB);
    run_wsa(&config_path, &["results", "import", file.to_str().unwrap()]);

    let _server = start_server(&config_path, &base);
    let client = reqwest::blocking::Client::new();

    let body: serde_json::Value = client
        .get(format!("{}/results", base))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(body["total"], 2);
    assert_eq!(body["results"][1]["title"], "B");

    let resp = client
        .post(format!("{}/search", base))
        .json(&serde_json::json!({ "query": "" }))
        .send()
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let err: serde_json::Value = resp.json().unwrap();
    assert_eq!(err["error"]["code"], "bad_request");
}
