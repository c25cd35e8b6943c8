//! Binding tests. Run with `wasm-pack test --node crates/tw-wasm`.

use serde_json::json;
use wasm_bindgen::JsValue;
use wasm_bindgen_test::*;

const PREFIX: &str = "http://localhost:8080/live/20180803160549";

fn setup() {
    if tw_wasm::is_initialized() {
        return;
    }
    let info = json!({
        "prefix": "http://localhost:8080/live/",
        "url": "https://tests.wombat.io/",
        "timestamp": "20180803160549",
        "wombat_sec": "1533312349",
        "mod": "mp_",
        "static_prefix": "http://localhost:8080/static/",
    });
    let info = serde_wasm_bindgen::to_value(&info).expect("wb_info");
    tw_wasm::init(info).expect("init");
}

#[wasm_bindgen_test]
fn test_second_init_rejected() {
    setup();
    assert!(tw_wasm::init(JsValue::NULL).is_err());
}

#[wasm_bindgen_test]
fn test_rewrite_url() {
    setup();
    assert_eq!(
        tw_wasm::rewrite_url("http://example.com/a.js", None).unwrap(),
        format!("{PREFIX}mp_/http://example.com/a.js")
    );
    assert_eq!(
        tw_wasm::rewrite_url("https://example.com/i.png", Some("im_".into())).unwrap(),
        format!("{PREFIX}im_/https://example.com/i.png")
    );
}

#[wasm_bindgen_test]
fn test_extract_original() {
    setup();
    let rewritten = format!("{PREFIX}im_/https://a.com/i.png");
    assert_eq!(tw_wasm::extract_original(&rewritten).unwrap(), "https://a.com/i.png");
}

#[wasm_bindgen_test]
fn test_rewrite_srcset_defaults_to_image() {
    setup();
    let out = tw_wasm::rewrite_srcset("https://a.com/1.png 1x, https://a.com/2.png 2x", None, None).unwrap();
    let parts: Vec<&str> = out.split(',').map(str::trim).collect();
    assert_eq!(
        parts,
        vec![
            format!("{PREFIX}im_/https://a.com/1.png 1x"),
            format!("{PREFIX}im_/https://a.com/2.png 2x"),
        ]
    );
}

#[wasm_bindgen_test]
fn test_rewrite_for_known_and_unknown_apis() {
    setup();
    let ws = tw_wasm::rewrite_for("websocket", "wss://a.com/socket").unwrap();
    assert_eq!(ws, "ws://localhost:8080/live/20180803160549ws_/https://a.com/socket");
    assert!(tw_wasm::rewrite_for("telnet", "https://a.com/").is_err());
}

#[wasm_bindgen_test]
fn test_set_cookie_strips_archive_prefix() {
    setup();
    let cookies = tw_wasm::set_cookie("a=http://localhost:8080/live/x").unwrap();
    assert_eq!(cookies.length(), 1);
    assert_eq!(cookies.get(0).as_string().as_deref(), Some("a=x"));
}

#[wasm_bindgen_test]
fn test_replay_clock_starts_at_capture() {
    setup();
    let capture = 1_533_312_349_000.0;
    let now = tw_wasm::replay_now().unwrap();
    assert!(now >= capture);
    assert!(now - capture < 60_000.0);
}

#[wasm_bindgen_test]
fn test_replay_random_is_in_range() {
    setup();
    for _ in 0..16 {
        let r = tw_wasm::replay_random().unwrap();
        assert!((0.0..1.0).contains(&r));
    }
}

#[wasm_bindgen_test]
fn test_wrap_script_scopes_globals() {
    let wrapped = tw_wasm::wrap_script("window.x = location.href;", None);
    assert!(wrapped.contains("_wb_wombat.local_init"));
    assert!(wrapped.ends_with("\n\n}"));
    assert_eq!(tw_wasm::wrap_script("{\"a\":1}", Some("application/json".into())), "{\"a\":1}");
}

#[wasm_bindgen_test]
fn test_fetch_plan_forces_credentials() {
    setup();
    let plan = tw_wasm::fetch_plan("/api").unwrap();
    let get = |k: &str| js_sys::Reflect::get(&plan, &JsValue::from_str(k)).unwrap();
    assert_eq!(get("url").as_string().unwrap(), format!("{PREFIX}mp_/https://tests.wombat.io/api"));
    assert_eq!(get("credentials").as_string().as_deref(), Some("include"));
    let header = js_sys::Reflect::get(&get("headers"), &JsValue::from_str("X-Pywb-Requested-With")).unwrap();
    assert_eq!(header.as_string().as_deref(), Some("XMLHttpRequest"));
}

#[wasm_bindgen_test]
fn test_document_write_buffers_incomplete_tags() {
    setup();
    assert_eq!(tw_wasm::document_write("<img src=\"http://a.com/i.png\"").unwrap(), None);
    let flushed = tw_wasm::document_write(">").unwrap().expect("complete tag");
    assert!(flushed.contains(&format!("{PREFIX}im_/http://a.com/i.png")));
}

#[wasm_bindgen_test]
fn test_document_writeln_keeps_newline_with_buffered_markup() {
    setup();
    assert_eq!(tw_wasm::document_writeln("<script>var a = 1;").unwrap(), None);
    let flushed = tw_wasm::document_writeln("</script>").unwrap().expect("complete script");
    assert!(flushed.starts_with("<script>var a = 1;\n</script>"), "{flushed}");
    assert!(flushed.ends_with("</script>\n"));
}
