//! Bridge worker binary. Spawned by the engine to host one plugin in
//! isolation; the shared-memory region ids arrive via the environment.

use plugrack_plugin::create_builtin;
use plugrack_plugin_server::BridgeServer;
use std::env;
use std::process::ExitCode;

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let mut args = env::args().skip(1);
    let (Some(plugin_type), Some(filename), Some(label), Some(unique_id)) =
        (args.next(), args.next(), args.next(), args.next())
    else {
        eprintln!("usage: plugrack-bridge <plugin-type> <filename> <label> <unique-id>");
        return ExitCode::FAILURE;
    };
    let _ = (filename, unique_id);

    let Ok(shm_ids) = env::var("ENGINE_BRIDGE_SHM_IDS") else {
        eprintln!("ENGINE_BRIDGE_SHM_IDS not set");
        return ExitCode::FAILURE;
    };

    // Format wrappers plug in here; the internal registry resolves the
    // labels this build ships with.
    let instance = match plugin_type.as_str() {
        "internal" => create_builtin(&label),
        other => {
            tracing::error!(plugin_type = other, "unsupported plugin type in this build");
            None
        }
    };
    let Some(instance) = instance else {
        eprintln!("cannot load plugin '{label}' of type '{plugin_type}'");
        return ExitCode::FAILURE;
    };

    let mut server = match BridgeServer::attach(&shm_ids, instance) {
        Ok(server) => server,
        Err(err) => {
            eprintln!("bridge attach failed: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = server.describe() {
        server.send_error(&err.to_string());
        return ExitCode::FAILURE;
    }
    match server.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            server.send_error(&err.to_string());
            ExitCode::FAILURE
        }
    }
}
