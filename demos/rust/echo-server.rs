// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::clap::{
    Arg,
    ArgMatches,
    Command,
};
use ::corio::{
    pal::socket::Socket,
    Config,
    Scheduler,
    WorkerPool,
    Yielder,
};
use ::socket2::{
    Domain,
    Type,
};
use ::std::{
    cell::Cell,
    net::SocketAddr,
    rc::Rc,
    str::FromStr,
};

//==============================================================================
// Program Arguments
//==============================================================================

/// Program Arguments
#[derive(Debug)]
pub struct ProgramArguments {
    /// Local socket IPv4 address.
    local: SocketAddr,
    /// Number of worker threads. Zero means the configured default.
    workers: usize,
    /// Path to a configuration file.
    config: Option<String>,
}

/// Associate functions for Program Arguments
impl ProgramArguments {
    /// Default local socket IPv4 address.
    const DEFAULT_LOCAL: &'static str = "127.0.0.1:12345";

    /// Parses the program arguments from the command line interface.
    pub fn new(app_name: &'static str, app_author: &'static str, app_about: &'static str) -> Result<Self> {
        let matches: ArgMatches = Command::new(app_name)
            .author(app_author)
            .about(app_about)
            .arg(
                Arg::new("local")
                    .long("local")
                    .value_parser(clap::value_parser!(String))
                    .required(false)
                    .value_name("ADDRESS:PORT")
                    .help("Sets local address"),
            )
            .arg(
                Arg::new("workers")
                    .long("workers")
                    .value_parser(clap::value_parser!(usize))
                    .required(false)
                    .value_name("COUNT")
                    .help("Sets number of worker threads"),
            )
            .arg(
                Arg::new("config")
                    .long("config")
                    .value_parser(clap::value_parser!(String))
                    .required(false)
                    .value_name("PATH")
                    .help("Sets configuration file"),
            )
            .get_matches();

        // Default arguments.
        let mut args: ProgramArguments = ProgramArguments {
            local: SocketAddr::from_str(Self::DEFAULT_LOCAL)?,
            workers: 0,
            config: None,
        };

        // Local address.
        if let Some(addr) = matches.get_one::<String>("local") {
            args.local = SocketAddr::from_str(addr)?;
        }

        // Workers.
        if let Some(workers) = matches.get_one::<usize>("workers") {
            args.workers = *workers;
        }

        // Configuration file.
        if let Some(path) = matches.get_one::<String>("config") {
            args.config = Some(path.clone());
        }

        Ok(args)
    }
}

//==============================================================================
// Application
//==============================================================================

/// Application
struct Application {
    /// Scheduler that accepts connections.
    scheduler: Scheduler,
    /// Listening socket.
    listener: Socket,
    /// Workers that serve accepted connections.
    pool: WorkerPool<Socket>,
}

/// Associated Functions for the Application
impl Application {
    /// Logging interval (in milliseconds).
    const LOG_INTERVAL_MS: u64 = 5000;
    /// Size of the echo buffer.
    const BUFFER_SIZE: usize = 4096;

    /// Instantiates the application.
    pub fn new(args: &ProgramArguments) -> Result<Self> {
        let config: Config = match args.config {
            Some(ref path) => Config::new(path)?,
            None => Config::default(),
        };

        let listener: Socket = Socket::new(Domain::IPV4, Type::STREAM)?;
        listener.bind(args.local)?;
        listener.listen(128)?;
        println!("Local Address: {:?}", listener.local_addr()?);

        let pool: WorkerPool<Socket> = WorkerPool::new(&config, args.workers, Self::serve)?;
        println!("Workers: {:?}", pool.len());

        Ok(Self {
            scheduler: Scheduler::new(&config)?,
            listener,
            pool,
        })
    }

    /// Echoes everything received on `socket` until the peer hangs up.
    fn serve(y: &Yielder, socket: Socket) {
        let mut buf: Vec<u8> = vec![0; Self::BUFFER_SIZE];
        loop {
            match y.recv(&socket, &mut buf, -1) {
                Ok(0) => break,
                Ok(n) => {
                    if let Err(e) = y.send_all(&socket, &buf[..n], -1) {
                        println!("WARN: send failed: {:?}", e);
                        break;
                    }
                },
                Err(e) => {
                    println!("WARN: receive failed: {:?}", e);
                    break;
                },
            }
        }
        if let Err(e) = y.cancel_io(socket.object()) {
            println!("WARN: cancel_io() failed: {:?}", e);
        }
    }

    /// Runs the target echo server.
    pub fn run(self) -> Result<()> {
        let Self {
            mut scheduler,
            listener,
            mut pool,
        } = self;
        let nclients: Rc<Cell<usize>> = Rc::new(Cell::new(0));

        let counter: Rc<Cell<usize>> = nclients.clone();
        scheduler.post_timer(Self::LOG_INTERVAL_MS, true, move || {
            println!("nclients={:?}", counter.get());
        });

        scheduler.start(
            "acceptor",
            move |y: &Yielder| loop {
                match y.accept(&listener, -1) {
                    Ok((socket, remote)) => {
                        nclients.set(nclients.get() + 1);
                        println!("INFO: connection from {:?}", remote);
                        if let Err(e) = pool.dispatch(socket) {
                            println!("ERROR: dispatch() failed: {:?}", e);
                            break;
                        }
                    },
                    Err(e) => {
                        println!("ERROR: accept() failed: {:?}", e);
                        break;
                    },
                }
            },
            0,
        )?;

        scheduler.run(true)?;
        anyhow::bail!("acceptor stopped")
    }
}

//======================================================================================================================
// main()
//======================================================================================================================

fn main() -> Result<()> {
    ::corio::runtime::logging::initialize();
    let args: ProgramArguments = ProgramArguments::new(
        "echo-server",
        "Microsoft Corporation",
        "Echoes TCP connections with a pool of cooperative schedulers.",
    )?;
    Application::new(&args)?.run()
}
