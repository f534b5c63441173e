use cerberus_dns::engine::*;
use cerberus_dns::shared::logs::{init_log, set_max_level};
use cerberus_dns::shared::net::*;
use colored::Colorize;
use std::sync::{atomic, Arc};
use std::{env, process, thread, time};

const DEFAULT_CONTROLLER_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_REST_LISTEN: &str = "0.0.0.0:8054";
const UDP_WORKER_THREADS: usize = 4;

fn main() -> std::io::Result<()> {
    init_log();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args.len() > 4 {
        print_usage();
        process::exit(1);
    }
    let controller_url = args.get(2).map(String::as_str).unwrap_or(DEFAULT_CONTROLLER_URL);
    let rest_listen = args.get(3).map(String::as_str).unwrap_or(DEFAULT_REST_LISTEN);
    let (rest_address, rest_port) = match parse_listen(rest_listen) {
        Some(listen) => listen,
        None => {
            log::error!("Invalid REST listen address: '{}'", rest_listen);
            print_usage();
            process::exit(1);
        }
    };

    let conf = match Conf::load(&args[1]) {
        Ok(conf) => {
            set_max_level(conf.log_level);
            log::info!(
                "Parsed configuration: {} rules, {} default upstreams.",
                conf.rules.len(),
                conf.upstreams.len()
            );
            conf
        }
        Err(err) => {
            log::error!("Parsing configuration: {}", err);
            process::exit(1);
        }
    };

    // Instantiate the policy stores and the northbound side: the trie is
    // seeded from the configuration, the reconciler is registered as the
    // trie update hook so directive flips reach the controller.
    let cache = Arc::new(ResponseCache::new(conf.cache_size, DEFAULT_CACHE_TTL));
    let trie = Arc::new(DomainTrie::new());
    trie.rebuild(&conf.rules);

    let nb_client = match NbApiClient::new(controller_url) {
        Ok(nb_client) => Arc::new(nb_client),
        Err(err) => {
            log::error!("Creating controller client: {}", err);
            process::exit(1);
        }
    };
    let reconciler = Arc::new(PolicyReconciler::new(nb_client, Arc::clone(&cache)));
    trie.set_update_hook(reconciler.clone());

    // Instantiate the forwarder, register the post-resolution callback
    // and pin the static records into the cache.
    let forwarder = Arc::new(Forwarder::new(
        Arc::clone(&trie),
        Arc::clone(&cache),
        conf.upstreams.clone(),
        UpstreamParams::default(),
    ));
    forwarder.set_resolution_hook(reconciler);
    forwarder.pin_static_records(&conf.statics());
    log::debug!("Active rule set: {:?}", trie.flatten());

    // Start the dns server threads, then drive the REST policy server on
    // the main thread. When the REST server exits the udp workers are
    // told to stop and woken up.
    let udp_params = UdpParams {
        address: conf.listen_address.to_string(),
        port: conf.listen_port,
        threads: UDP_WORKER_THREADS,
        write_timeout: time::Duration::from_secs(5),
    };
    let stop = Arc::new(atomic::AtomicBool::new(false));
    let server_thread = {
        let forwarder = Arc::clone(&forwarder);
        let udp_params = udp_params.clone();
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            if let Err(err) = start_udp_server(forwarder, udp_params, stop) {
                log::error!("Cannot start UDP server: {}", err);
            }
        })
    };

    let service = Arc::new(PolicyService::new(forwarder));
    let rest_params = RestParams { address: rest_address, port: rest_port };
    let result = actix_web::rt::System::new().block_on(start_rest_server(service, rest_params));

    stop.store(true, atomic::Ordering::SeqCst);
    wake_udp_server(&udp_params);
    let _ = server_thread.join();
    result
}

fn parse_listen(listen: &str) -> Option<(String, u16)> {
    let (address, port) = listen.rsplit_once(':')?;
    let port = port.parse().ok()?;
    Some((address.to_string(), port))
}

fn print_usage() {
    log::error!(
        "Usage: {} {} [controller-url] [rest-listen-address]
Defaults: controller-url '{}', rest-listen-address '{}'.",
        "path/to/policy_engine".bold(),
        "path/to/config".bold().bright_green(),
        DEFAULT_CONTROLLER_URL,
        DEFAULT_REST_LISTEN,
    )
}
