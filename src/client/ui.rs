//! Panel state machine behind the console front ends.
//!
//! Every user gesture and every server answer is an [`Action`]. Feeding one
//! to [`Ui::dispatch`] updates the panel state and returns the [`Effect`]s
//! (requests, prompts) the front end must carry out; their outcomes come
//! back as further actions. Nothing here touches the network or a DOM.
//!
//! Each operation moves `Idle → Pending → Success | Error`. Editing the
//! input of a panel puts a finished operation back to `Idle`.

use crate::{
    client::{ApiClient, ClientError},
    models::file::FileDescriptor,
};
use serde_json::Value;
use std::{collections::VecDeque, path::PathBuf};

pub const NO_FILE_SELECTED: &str = "Please select a file to upload.";
pub const INVALID_JSON: &str = "Invalid JSON data. Please check your input.";

#[derive(Debug, Clone, PartialEq)]
pub enum Phase<T> {
    Idle,
    Pending,
    Success(T),
    Error(String),
}

impl<T> Default for Phase<T> {
    fn default() -> Self {
        Phase::Idle
    }
}

impl<T> Phase<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Phase::Pending)
    }

    fn finished(&self) -> bool {
        matches!(self, Phase::Success(_) | Phase::Error(_))
    }

    fn settle(result: Result<T, String>) -> Self {
        match result {
            Ok(value) => Phase::Success(value),
            Err(message) => Phase::Error(message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilePanel {
    pub listing: Phase<Vec<FileDescriptor>>,
    /// Public URL of the last upload.
    pub upload: Phase<String>,
    /// Server message of the last delete.
    pub delete: Phase<String>,
    /// File picked in the upload input.
    pub selected: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionPanel {
    /// Freeform JSON typed by the user.
    pub input: String,
    pub call: Phase<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    RefreshFiles,
    FilesLoaded(Result<Vec<FileDescriptor>, String>),
    SelectFile(Option<PathBuf>),
    SubmitUpload,
    UploadFinished(Result<String, String>),
    RequestDelete(String),
    DeleteConfirmed { name: String, confirmed: bool },
    DeleteFinished(Result<String, String>),
    EditFunctionInput(String),
    SubmitFunction,
    FunctionFinished(Result<Value, String>),
}

/// Work the front end performs on behalf of the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    FetchFiles,
    UploadFile(PathBuf),
    /// Ask the user to confirm deleting this object.
    ConfirmDelete(String),
    DeleteFile(String),
    CallFunction(Value),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ui {
    pub files: FilePanel,
    pub function: FunctionPanel,
}

impl Ui {
    pub fn dispatch(&mut self, action: Action) -> Vec<Effect> {
        match action {
            Action::RefreshFiles => self.refresh(),
            Action::FilesLoaded(result) => {
                self.files.listing = Phase::settle(result);
                vec![]
            }
            Action::SelectFile(path) => {
                self.files.selected = path;
                if self.files.upload.finished() {
                    self.files.upload = Phase::Idle;
                }
                vec![]
            }
            Action::SubmitUpload => {
                if self.files.upload.is_pending() {
                    return vec![];
                }
                match self.files.selected.clone() {
                    None => {
                        self.files.upload = Phase::Error(NO_FILE_SELECTED.into());
                        vec![]
                    }
                    Some(path) => {
                        self.files.upload = Phase::Pending;
                        vec![Effect::UploadFile(path)]
                    }
                }
            }
            Action::UploadFinished(result) => {
                let succeeded = result.is_ok();
                self.files.upload = Phase::settle(result);
                if succeeded {
                    self.files.selected = None;
                    self.refresh()
                } else {
                    vec![]
                }
            }
            Action::RequestDelete(name) => {
                if self.files.delete.is_pending() {
                    return vec![];
                }
                vec![Effect::ConfirmDelete(name)]
            }
            Action::DeleteConfirmed { name, confirmed } => {
                if !confirmed {
                    self.files.delete = Phase::Idle;
                    return vec![];
                }
                self.files.delete = Phase::Pending;
                vec![Effect::DeleteFile(name)]
            }
            Action::DeleteFinished(result) => {
                let succeeded = result.is_ok();
                self.files.delete = Phase::settle(result);
                if succeeded { self.refresh() } else { vec![] }
            }
            Action::EditFunctionInput(text) => {
                self.function.input = text;
                if self.function.call.finished() {
                    self.function.call = Phase::Idle;
                }
                vec![]
            }
            Action::SubmitFunction => {
                if self.function.call.is_pending() {
                    return vec![];
                }
                match parse_function_input(&self.function.input) {
                    Some(payload) => {
                        self.function.call = Phase::Pending;
                        vec![Effect::CallFunction(payload)]
                    }
                    None => {
                        self.function.call = Phase::Error(INVALID_JSON.into());
                        vec![]
                    }
                }
            }
            Action::FunctionFinished(result) => {
                self.function.call = Phase::settle(result);
                vec![]
            }
        }
    }

    fn refresh(&mut self) -> Vec<Effect> {
        if self.files.listing.is_pending() {
            return vec![];
        }
        self.files.listing = Phase::Pending;
        vec![Effect::FetchFiles]
    }

    /// One-line summary of the upload panel, as the page shows it.
    pub fn upload_status(&self) -> Option<String> {
        match &self.files.upload {
            Phase::Success(url) => Some(format!("File uploaded successfully. URL: {}", url)),
            Phase::Error(err) if err == NO_FILE_SELECTED => Some(err.clone()),
            Phase::Error(err) => Some(format!("Error: {}", err)),
            Phase::Pending => Some("Uploading...".into()),
            Phase::Idle => None,
        }
    }

    /// One-line (or pretty JSON) summary of the function panel.
    pub fn function_status(&self) -> Option<String> {
        match &self.function.call {
            Phase::Success(result) => Some(format!(
                "Function called successfully. Result: {}",
                serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string())
            )),
            Phase::Error(err) if err == INVALID_JSON => Some(err.clone()),
            Phase::Error(err) => Some(format!("Error: {}", err)),
            Phase::Pending => Some("Calling...".into()),
            Phase::Idle => None,
        }
    }
}

/// Empty input means `{}`; `None` for malformed JSON.
fn parse_function_input(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return Some(Value::Object(Default::default()));
    }
    serde_json::from_str(text).ok()
}

/// Human-readable size: `0 Bytes`, `512 Bytes`, `1.5 KB`, … `TB`.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 Bytes".into();
    }
    let mut exponent = 0;
    let mut scaled = bytes as f64;
    while scaled >= 1024.0 && exponent < UNITS.len() - 1 {
        scaled /= 1024.0;
        exponent += 1;
    }
    let rounded = (scaled * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[exponent])
}

/// Runs the state machine against a live server.
///
/// `confirm` answers [`Effect::ConfirmDelete`] prompts.
pub struct Session<C> {
    pub ui: Ui,
    client: ApiClient,
    confirm: C,
}

impl<C> Session<C>
where
    C: FnMut(&str) -> bool,
{
    pub fn new(client: ApiClient, confirm: C) -> Self {
        Self {
            ui: Ui::default(),
            client,
            confirm,
        }
    }

    /// Dispatch `action` and keep performing effects until none remain.
    pub async fn run(&mut self, action: Action) {
        let mut queue = VecDeque::from([action]);
        while let Some(action) = queue.pop_front() {
            for effect in self.ui.dispatch(action) {
                queue.push_back(self.perform(effect).await);
            }
        }
    }

    async fn perform(&mut self, effect: Effect) -> Action {
        fn message<T>(result: Result<T, ClientError>) -> Result<T, String> {
            result.map_err(|err| err.to_string())
        }

        match effect {
            Effect::FetchFiles => Action::FilesLoaded(message(self.client.list_files().await)),
            Effect::UploadFile(path) => {
                Action::UploadFinished(message(self.client.upload_file(&path).await))
            }
            Effect::ConfirmDelete(name) => {
                let confirmed = (self.confirm)(&name);
                Action::DeleteConfirmed { name, confirmed }
            }
            Effect::DeleteFile(name) => {
                Action::DeleteFinished(message(self.client.delete_file(&name).await))
            }
            Effect::CallFunction(payload) => {
                Action::FunctionFinished(message(self.client.call_function(&payload).await))
            }
        }
    }
}
