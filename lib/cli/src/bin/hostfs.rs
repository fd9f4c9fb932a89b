use hostfs_bridge_cli::commands::HostfsCmd;

fn main() -> std::process::ExitCode {
    HostfsCmd::run()
}
