//! sshpipe relay server - main entrypoint
// (c) 2024 Ross Younger

fn main() -> anyhow::Result<std::process::ExitCode> {
    sshpipe::cli()
}
