//! Node.js built-in module names.

/// Built-ins importable with or without the `node:` prefix.
const NODE_BUILTINS: &[&str] = &[
    "_http_agent", "_http_client", "_http_common", "_http_incoming", "_http_outgoing",
    "_http_server", "_stream_duplex", "_stream_passthrough", "_stream_readable",
    "_stream_transform", "_stream_wrap", "_stream_writable", "_tls_common", "_tls_wrap",
    "assert", "assert/strict", "async_hooks", "buffer", "child_process", "cluster", "console",
    "constants", "crypto", "dgram", "diagnostics_channel", "dns", "dns/promises", "domain",
    "events", "fs", "fs/promises", "http", "http2", "https", "inspector", "inspector/promises",
    "module", "net", "os", "path", "path/posix", "path/win32", "perf_hooks", "process",
    "punycode", "querystring", "readline", "readline/promises", "repl", "stream",
    "stream/consumers", "stream/promises", "stream/web", "string_decoder", "sys", "timers",
    "timers/promises", "tls", "trace_events", "tty", "url", "util", "util/types", "v8", "vm",
    "wasi", "worker_threads", "zlib",
];

/// Built-ins that only exist under the `node:` scheme.
const NODE_PREFIXED_ONLY: &[&str] = &["node:sea", "node:sqlite", "node:test", "node:test/reporters"];

/// Whether `id` names a Node built-in (`fs`, `node:fs`, `node:test`).
#[must_use]
pub fn is_builtin(id: &str) -> bool {
    if NODE_PREFIXED_ONLY.contains(&id) {
        return true;
    }
    let bare = id.strip_prefix("node:").unwrap_or(id);
    NODE_BUILTINS.binary_search(&bare).is_ok()
}
