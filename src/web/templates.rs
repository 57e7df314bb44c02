use std::{borrow::Cow, path::Path};

use chrono::{Datelike, Utc};

use crate::web::{flash::Flash, ingest::InputMode, store::AuthUser};

const APP_TITLE: &str = "Online Food Recognition";

const BASE_STYLES: &str = r#"
        :root { color-scheme: light; }
        body { font-family: "Helvetica Neue", Arial, sans-serif; margin: 0; background: #f8fafc; color: #0f172a; }
        header { background: #ffffff; padding: 1.5rem; border-bottom: 1px solid #e2e8f0; }
        .header-bar { display: flex; justify-content: space-between; align-items: center; flex-wrap: wrap; gap: 1rem; }
        .header-bar h1 { margin: 0; font-size: 1.6rem; }
        nav { display: flex; gap: 0.75rem; flex-wrap: wrap; align-items: center; }
        nav a { color: #1d4ed8; text-decoration: none; font-weight: 600; background: #e0f2fe; padding: 0.45rem 0.9rem; border-radius: 999px; border: 1px solid #bfdbfe; }
        nav a.active { background: #1d4ed8; color: #ffffff; border-color: #1d4ed8; }
        nav span { color: #475569; font-size: 0.95rem; }
        main { padding: 2rem 1.5rem; max-width: 960px; margin: 0 auto; box-sizing: border-box; }
        section { margin-bottom: 2rem; }
        .panel { background: #ffffff; border-radius: 12px; border: 1px solid #e2e8f0; padding: 1.5rem; box-shadow: 0 18px 40px rgba(15, 23, 42, 0.08); }
        .panel h2 { margin-top: 0; }
        label { display: block; margin: 1rem 0 0.4rem; font-weight: 600; }
        input[type="text"], input[type="email"], input[type="password"], input[type="url"], select { width: 100%; padding: 0.75rem; border-radius: 8px; border: 1px solid #cbd5f5; background: #f8fafc; box-sizing: border-box; }
        input[type="range"] { width: 100%; }
        .toggles { display: flex; gap: 1.25rem; flex-wrap: wrap; margin-top: 1rem; }
        .toggles label { display: inline-flex; align-items: center; gap: 0.4rem; margin: 0; font-weight: 500; }
        button { margin-top: 1.5rem; padding: 0.85rem 1.2rem; border: none; border-radius: 8px; background: #2563eb; color: #ffffff; font-weight: 600; cursor: pointer; }
        button:hover { background: #1d4ed8; }
        .flash { padding: 1rem 1.25rem; border-radius: 10px; margin-bottom: 1.5rem; font-weight: 600; border: 1px solid transparent; }
        .flash.success { background: #ecfdf3; border-color: #bbf7d0; color: #166534; }
        .flash.error { background: #fef2f2; border-color: #fecaca; color: #b91c1c; }
        .result-media img, .result-media video { max-width: 100%; border-radius: 10px; border: 1px solid #e2e8f0; }
        .downloads a { color: #2563eb; text-decoration: none; margin-right: 1rem; font-weight: 600; }
        .note { color: #475569; font-size: 0.95rem; line-height: 1.6; }
        .app-footer { margin-top: 3rem; text-align: center; font-size: 0.85rem; color: #94a3b8; }
"#;

const WEBCAM_SCRIPT: &str = r#"<script>
const video = document.getElementById('webcam-stream');
const canvas = document.getElementById('webcam-canvas');
const capture = document.getElementById('capture');
const form = document.getElementById('analyze-form');

if (navigator.mediaDevices && navigator.mediaDevices.getUserMedia) {
    navigator.mediaDevices.getUserMedia({ video: true })
        .then((stream) => { video.srcObject = stream; })
        .catch((err) => { console.error(err); });
}

form.addEventListener('submit', () => {
    canvas.width = video.videoWidth;
    canvas.height = video.videoHeight;
    canvas.getContext('2d').drawImage(video, 0, 0);
    capture.value = canvas.toDataURL('image/jpeg');
});
</script>"#;

const RANGE_SCRIPT: &str = r#"<script>
document.querySelectorAll('input[type="range"]').forEach((range) => {
    const output = document.getElementById(range.id + '-value');
    if (!output) return;
    const sync = () => { output.textContent = range.value + '%'; };
    range.addEventListener('input', sync);
    sync();
});
</script>"#;

pub struct PageLayout<'a> {
    pub meta_title: &'a str,
    pub active_path: &'a str,
    pub user: Option<&'a AuthUser>,
    pub flash: Option<Flash>,
    pub body_html: Cow<'a, str>,
    pub body_scripts: Vec<Cow<'a, str>>,
}

pub fn render_page(layout: PageLayout<'_>) -> String {
    let PageLayout {
        meta_title,
        active_path,
        user,
        flash,
        body_html,
        body_scripts,
    } = layout;

    let nav = render_nav(active_path, user);
    let flash_html = render_flash(flash);
    let footer = render_footer();
    let scripts = body_scripts
        .into_iter()
        .map(|script| script.into_owned())
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>{meta_title} | {APP_TITLE}</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <style>
{BASE_STYLES}
    </style>
</head>
<body>
    <header>
        <div class="header-bar">
            <h1>{APP_TITLE}</h1>
            {nav}
        </div>
    </header>
    <main>
        {flash_html}
{body_html}
        {footer}
    </main>
{scripts}
</body>
</html>"#,
        meta_title = escape_html(meta_title),
    )
}

fn render_nav(active_path: &str, user: Option<&AuthUser>) -> String {
    let mut links = [("/", "Upload"), ("/url", "URL"), ("/webcam", "Webcam")]
        .iter()
        .map(|(href, label)| nav_link(href, label, active_path))
        .collect::<Vec<_>>();

    match user {
        Some(user) => {
            links.push(format!(
                r#"<span title="{}">Signed in as <strong>{}</strong></span>"#,
                escape_html(&user.email),
                escape_html(&user.username)
            ));
            links.push(r#"<a href="/logout">Log out</a>"#.to_string());
        }
        None => {
            links.push(nav_link("/login", "Log in", active_path));
            links.push(nav_link("/register", "Register", active_path));
        }
    }

    format!("<nav>{}</nav>", links.join(""))
}

fn nav_link(href: &str, label: &str, active_path: &str) -> String {
    let class = if href == active_path {
        r#" class="active""#
    } else {
        ""
    };
    format!(r#"<a href="{href}"{class}>{label}</a>"#)
}

pub fn render_flash(flash: Option<Flash>) -> String {
    let Some(flash) = flash else {
        return String::new();
    };
    let class = if flash.is_error() { "error" } else { "success" };
    format!(
        r#"<div class="flash {class}">{}</div>"#,
        escape_html(flash.message())
    )
}

/// Values produced by the pipeline for the result panel.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisView {
    pub out_name: String,
    pub segname: String,
    pub fname: String,
    pub output_type: String,
    pub filetype: String,
    pub csv_name: String,
    pub csv_name2: String,
    pub segmentation: bool,
}

pub enum PageOutcome {
    Result(AnalysisView),
    Error(String),
}

pub struct InputPage<'a> {
    pub mode: InputMode,
    pub user: Option<&'a AuthUser>,
    pub flash: Option<Flash>,
    pub outcome: Option<PageOutcome>,
}

pub fn render_input_page(page: InputPage<'_>) -> String {
    let InputPage {
        mode,
        user,
        flash,
        outcome,
    } = page;

    let (meta_title, heading, source_html, enctype) = match mode {
        InputMode::Upload => (
            "Upload image",
            "Analyze an uploaded image",
            r#"<label for="file">Food image</label>
                        <input id="file" type="file" name="file" accept="image/*" required>"#,
            r#" enctype="multipart/form-data""#,
        ),
        InputMode::Url => (
            "Image URL",
            "Analyze an image from a URL",
            r#"<label for="url">Image URL</label>
                        <input id="url" type="url" name="url" placeholder="https://example.com/dish.jpg" required>"#,
            "",
        ),
        InputMode::Webcam => (
            "Webcam capture",
            "Analyze a webcam snapshot",
            r#"<video id="webcam-stream" autoplay playsinline style="max-width:100%;border-radius:10px;"></video>
                        <canvas id="webcam-canvas" hidden></canvas>
                        <input id="capture" type="hidden" name="capture">"#,
            "",
        ),
    };

    let outcome_html = match outcome {
        Some(PageOutcome::Result(view)) => render_result_panel(mode, &view),
        Some(PageOutcome::Error(message)) => format!(
            r#"        <section class="panel" data-view="{view}">
            <div class="flash error">{message}</div>
        </section>"#,
            view = mode.result_view(),
            message = escape_html(&message),
        ),
        None => String::new(),
    };

    let body_html = format!(
        r#"        <section class="panel">
            <h2>{heading}</h2>
            <form id="analyze-form" method="post" action="/analyze"{enctype}>
                        {source_html}
                        {parameters}
                <button type="submit" name="{button}" value="analyze">Analyze</button>
            </form>
        </section>
{outcome_html}"#,
        parameters = render_parameter_controls(),
        button = mode.button_name(),
    );

    let mut scripts = vec![Cow::Borrowed(RANGE_SCRIPT)];
    if mode == InputMode::Webcam {
        scripts.push(Cow::Borrowed(WEBCAM_SCRIPT));
    }

    render_page(PageLayout {
        meta_title,
        active_path: mode.form_path(),
        user,
        flash,
        body_html: Cow::Owned(body_html),
        body_scripts: scripts,
    })
}

fn render_parameter_controls() -> &'static str {
    r#"<label for="threshold-range">IoU threshold <span id="threshold-range-value"></span></label>
                        <input id="threshold-range" type="range" name="threshold-range" min="0" max="100" value="45">
                        <label for="confidence-range">Confidence threshold <span id="confidence-range-value"></span></label>
                        <input id="confidence-range" type="range" name="confidence-range" min="0" max="100" value="25">
                        <label for="model-types">Model</label>
                        <select id="model-types" name="model-types">
                            <option value="YOLOv5s">YOLOv5s</option>
                            <option value="YOLOv5m">YOLOv5m</option>
                            <option value="YOLOv5l">YOLOv5l</option>
                            <option value="YOLOv5x" selected>YOLOv5x</option>
                        </select>
                        <div class="toggles">
                            <label><input type="checkbox" name="enhanced"> Enhanced</label>
                            <label><input type="checkbox" name="ensemble"> Ensemble</label>
                            <label><input type="checkbox" name="tta"> Test-time augmentation</label>
                            <label><input type="checkbox" name="seg"> Segmentation</label>
                        </div>"#
}

fn render_result_panel(mode: InputMode, view: &AnalysisView) -> String {
    let media_kind = if view.segmentation {
        "segmentations"
    } else {
        "detections"
    };
    let media_src = artifact_url(media_kind, &view.segname);
    let media_html = if view.output_type == "video" {
        format!(r#"<video controls src="{media_src}"></video>"#)
    } else {
        format!(
            r#"<img src="{media_src}" alt="{alt}">"#,
            alt = escape_html(&view.out_name)
        )
    };

    format!(
        r#"        <section class="panel" data-view="{view_name}">
            <h2>Result</h2>
            <p class="note">Input <strong>{fname}</strong> ({filetype}) produced <strong>{out_name}</strong>.</p>
            <div class="result-media">{media_html}</div>
            <p class="downloads">
                <a href="{csv_url}">Download nutrition report</a>
                <a href="{csv2_url}">Download detection report</a>
            </p>
        </section>"#,
        view_name = mode.result_view(),
        fname = escape_html(&view.fname),
        filetype = escape_html(&view.filetype),
        out_name = escape_html(&view.out_name),
        csv_url = artifact_url("csv", &view.csv_name),
        csv2_url = artifact_url("csv", &view.csv_name2),
    )
}

/// Link to a stored artifact by the final component of its path.
pub fn artifact_url(kind: &str, name_or_path: &str) -> String {
    let name = Path::new(name_or_path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(name_or_path);
    format!("/artifacts/{kind}/{}", escape_html(name))
}

pub fn render_login_page(flash: Option<Flash>) -> String {
    let body_html = r#"        <section class="panel">
            <h2>Log in</h2>
            <form method="post" action="/login">
                <label for="email">Email</label>
                <input id="email" type="email" name="email" required>
                <label for="password">Password</label>
                <input id="password" type="password" name="password" required>
                <button type="submit">Log in</button>
            </form>
            <p class="note">No account yet? <a href="/register">Register</a>.</p>
        </section>"#;

    render_page(PageLayout {
        meta_title: "Log in",
        active_path: "/login",
        user: None,
        flash,
        body_html: Cow::Borrowed(body_html),
        body_scripts: Vec::new(),
    })
}

pub fn render_register_page(flash: Option<Flash>) -> String {
    let body_html = r#"        <section class="panel">
            <h2>Create an account</h2>
            <form method="post" action="/register">
                <label for="username">Username</label>
                <input id="username" type="text" name="username" required>
                <label for="email">Email</label>
                <input id="email" type="email" name="email" required>
                <label for="password">Password</label>
                <input id="password" type="password" name="password" required>
                <button type="submit">Register</button>
            </form>
        </section>"#;

    render_page(PageLayout {
        meta_title: "Register",
        active_path: "/register",
        user: None,
        flash,
        body_html: Cow::Borrowed(body_html),
        body_scripts: Vec::new(),
    })
}

pub fn render_failure_page(title: &str, message: &str) -> String {
    let body_html = format!(
        r#"        <section class="panel">
            <h2>{title}</h2>
            <p class="note">{message}</p>
            <p><a href="/">Back to the upload page</a></p>
        </section>"#,
        title = escape_html(title),
        message = escape_html(message),
    );

    render_page(PageLayout {
        meta_title: title,
        active_path: "",
        user: None,
        flash: None,
        body_html: Cow::Owned(body_html),
        body_scripts: Vec::new(),
    })
}

pub fn render_footer() -> String {
    let current_year = Utc::now().year();
    format!(r#"<footer class="app-footer">© {current_year} {APP_TITLE}</footer>"#)
}

pub fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
