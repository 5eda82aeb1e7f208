use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    style::{Color, Style},
    symbols,
    text::Span,
    widgets::{Axis, Block, Chart, Dataset, GraphType},
    Frame, Terminal,
};
use std::{
    error::Error,
    io,
    time::{Duration, Instant},
};

use telerelay::render_signal::RenderSignal;

/// Top-down positions of the bodies in one render signal, split by whether
/// the body reports joints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BodyPoints {
    pub jointed: Vec<(f64, f64)>,
    pub free: Vec<(f64, f64)>,
}

impl BodyPoints {
    pub fn from_signal(signal: &RenderSignal) -> Self {
        let mut points = BodyPoints::default();
        for state in signal.values() {
            let xy = (state.position[0] as f64, state.position[1] as f64);
            match state.joints {
                Some(_) => points.jointed.push(xy),
                None => points.free.push(xy),
            }
        }
        points
    }
}

type PointGenerator = Box<dyn FnMut() -> BodyPoints>;

struct App {
    points_generator: PointGenerator,
    points: BodyPoints,
}

impl App {
    fn new(points_generator: PointGenerator) -> App {
        App {
            points_generator,
            points: BodyPoints::default(),
        }
    }

    fn on_tick(&mut self) {
        self.points = (self.points_generator)();
    }
}

pub fn engage_gui(points_generator: PointGenerator) -> Result<(), Box<dyn Error>> {
    // setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // create app and run it
    let tick_rate = Duration::from_millis(250);
    let app = App::new(points_generator);
    let res = run_app(&mut terminal, app, tick_rate);

    // restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("{:?}", err)
    }

    Ok(())
}

fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    mut app: App,
    tick_rate: Duration,
) -> io::Result<()> {
    let mut last_tick = Instant::now();
    loop {
        terminal.draw(|f| ui(f, &app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));
        if crossterm::event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if let KeyCode::Char('q') = key.code {
                    return Ok(());
                }
            }
        }
        if last_tick.elapsed() >= tick_rate {
            app.on_tick();
            last_tick = Instant::now();
        }
    }
}

fn axis(title: &'static str) -> Axis<'static> {
    Axis::default()
        .title(Span::styled(title, Style::default().fg(Color::Red)))
        .style(Style::default().fg(Color::White))
        .bounds([-2.0, 2.0])
        .labels(
            ["-2.0", "-1.0", "0.0", "1.0", "2.0"]
                .iter()
                .cloned()
                .map(Span::from)
                .collect(),
        )
}

// Top-down view in metres, x forward and y left
fn ui(f: &mut Frame, app: &App) {
    let chart = Chart::new(vec![
        Dataset::default()
            .name("Jointed")
            .marker(symbols::Marker::Dot)
            .graph_type(GraphType::Scatter)
            .style(Style::default().fg(Color::Cyan))
            .data(&app.points.jointed),
        Dataset::default()
            .name("Free")
            .marker(symbols::Marker::Dot)
            .graph_type(GraphType::Scatter)
            .style(Style::default().fg(Color::Red))
            .data(&app.points.free),
    ])
    .block(Block::default().title("Scene"))
    .x_axis(axis("X (m)"))
    .y_axis(axis("Y (m)"));

    f.render_widget(chart, f.size());
}

#[cfg(test)]
mod tests {
    use super::*;
    use telerelay::render_signal::BodyState;

    #[test]
    fn splits_jointed_and_free_bodies() {
        let mut signal = RenderSignal::new();
        signal.insert(
            1,
            BodyState {
                position: [0.5, -0.25, 1.0],
                orientation: [0.0, 0.0, 0.0, 1.0],
                joints: Some(vec![0.0; 7]),
            },
        );
        signal.insert(
            3,
            BodyState {
                position: [0.85, -0.2, 0.7],
                orientation: [0.0, 0.0, 0.0, 1.0],
                joints: None,
            },
        );
        let points = BodyPoints::from_signal(&signal);
        assert_eq!(points.jointed, vec![(0.5, -0.25)]);
        assert_eq!(points.free.len(), 1);
        assert!((points.free[0].0 - 0.85).abs() < 1e-6);
    }
}
