pub mod app;
pub mod ui;

use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use counting_common::video_meta::CountReport;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};

use crate::worker::{self, Control, WorkerEvent, WorkerJob};
use app::App;

const UI_FPS: u64 = 30;
const UI_FRAME_TIME: Duration = Duration::from_millis(1000 / UI_FPS);

/// Runs `job` behind the dashboard until the user quits.
pub fn run_with_tui(job: WorkerJob, parameters: Vec<(&'static str, String)>) -> Result<Option<CountReport>> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let (control_tx, control_rx) = mpsc::channel();
    let (event_tx, event_rx) = mpsc::channel();
    let worker = worker::spawn_worker(job, control_rx, event_tx);

    let result = run_tui_loop(&mut terminal, App::new(parameters), &control_tx, event_rx);

    // Cleanup terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    // Closing the channel stops a worker that is still running.
    drop(control_tx);
    let report = match worker.join() {
        Ok(Ok(report)) => Some(report),
        Ok(Err(err)) => {
            eprintln!("Worker failed: {err:#}");
            None
        }
        Err(_) => anyhow::bail!("Worker thread panicked"),
    };

    result.map(|_| report)
}

fn run_tui_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    mut app: App,
    control_tx: &Sender<Control>,
    event_rx: Receiver<WorkerEvent>,
) -> Result<()> {
    let mut last_render = Instant::now()
        .checked_sub(UI_FRAME_TIME)
        .unwrap_or_else(Instant::now);

    loop {
        // Throttle rendering to UI_FPS
        if last_render.elapsed() >= UI_FRAME_TIME {
            terminal.draw(|f| ui::draw(f, &app))?;
            last_render = Instant::now();
        }

        if event::poll(Duration::from_millis(16))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    let command = match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => app.quit(),
                        KeyCode::Char('p') | KeyCode::Char('P') | KeyCode::Char(' ') => {
                            app.toggle_pause()
                        }
                        KeyCode::Char('s') | KeyCode::Char('S') => app.stop(),
                        KeyCode::Char('r') | KeyCode::Char('R') => app.snapshot(),
                        _ => None,
                    };
                    if let Some(command) = command {
                        // The worker may already be gone.
                        let _ = control_tx.send(command);
                    }
                }
            }
        }

        // Process messages from worker thread
        while let Ok(event) = event_rx.try_recv() {
            app.update(event);
        }

        if app.should_quit() {
            break;
        }

        thread::sleep(Duration::from_millis(5));
    }

    Ok(())
}
