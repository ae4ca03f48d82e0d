use deep_watermark::config::Architecture;
use deep_watermark::{cli, commands, logging};

fn main() {
	let app_m = cli::build_cli();

	let result = match app_m.subcommand() {
		("hidden", Some(sub_m)) => commands::train(Architecture::Hidden, sub_m),
		("unet-conv", Some(sub_m)) => commands::train(Architecture::UnetConv, sub_m),
		("resume", Some(sub_m)) => commands::resume(sub_m),
		("generate-config", Some(sub_m)) => {
			if let Err(err) = logging::init_simple_logger() {
				eprintln!("Could not initialise logging: {}", err);
			}
			commands::generate_config(sub_m)
		}
		_ => {
			eprintln!("{}", app_m.usage());
			std::process::exit(2);
		}
	};

	if let Err(err) = result {
		tracing::error!("Error: {}", err);
		eprintln!("Error: {}", err);
		std::process::exit(1);
	}
}
