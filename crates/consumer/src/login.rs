//! Login stream: the first request on an active channel, and the last stream closed.
use eta_codec::rdm::{domain, login as attrib, name_type, DataState, StreamState};
use eta_codec::{DataValue, ElementList, Msg, MsgBody, MsgKey, State};
use eta_metadata::consumer::LoginConfig;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::sink::MsgSink;
use crate::LOGIN_STREAM_ID;

/// Who the consumer logs in as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginIdentity {
    pub user_name: String,
    pub application_id: String,
    pub application_name: String,
    pub position: Option<String>,
}

impl LoginIdentity {
    /// Configured user, else the OS user, else "Unknown"
    pub fn from_config(config: &LoginConfig) -> Self {
        let user_name = config
            .user_name
            .clone()
            .filter(|name| !name.is_empty())
            .or_else(|| std::env::var("USER").ok())
            .or_else(|| std::env::var("USERNAME").ok())
            .unwrap_or_else(|| "Unknown".to_string());
        Self {
            user_name,
            application_id: config.application_id.clone(),
            application_name: config.application_name.clone(),
            position: config.position.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    NotSent,
    Sent,
    Established,
    Denied,
    Suspect,
    Closed,
}

/// How a login response changed the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Unchanged,
    Established,
    Denied(String),
    Suspect(String),
    Closed,
}

pub struct LoginStage {
    identity: LoginIdentity,
    state: LoginState,
}

impl LoginStage {
    pub fn new(identity: LoginIdentity) -> Self {
        Self {
            identity,
            state: LoginState::NotSent,
        }
    }

    pub fn state(&self) -> LoginState {
        self.state
    }

    pub fn identity(&self) -> &LoginIdentity {
        &self.identity
    }

    /// The initial login request is always streaming
    pub fn request_msg(&self) -> Msg {
        let mut attribs = ElementList::new()
            .with(attrib::APPLICATION_ID, DataValue::ascii(self.identity.application_id.as_str()))
            .with(attrib::APPLICATION_NAME, DataValue::ascii(self.identity.application_name.as_str()))
            .with(attrib::ROLE, DataValue::UInt(attrib::ROLE_CONSUMER));
        if let Some(position) = &self.identity.position {
            attribs.push(attrib::POSITION, DataValue::ascii(position.as_str()));
        }
        Msg::request(LOGIN_STREAM_ID, domain::LOGIN, true).with_key(
            MsgKey::named(self.identity.user_name.as_str(), name_type::USER_NAME).with_attrib(attribs),
        )
    }

    pub fn send_request<S: MsgSink + ?Sized>(&mut self, sink: &mut S) -> Result<(), SessionError> {
        sink.send_msg(&self.request_msg())?;
        info!(
            user = %self.identity.user_name,
            application = %self.identity.application_name,
            "Login request sent"
        );
        self.state = LoginState::Sent;
        Ok(())
    }

    pub fn on_response(&mut self, msg: &Msg) -> LoginOutcome {
        match &msg.body {
            MsgBody::Refresh {
                solicited, state, ..
            } => {
                if !solicited {
                    info!("Received unsolicited login refresh");
                }
                log_refresh_attributes(msg);
                self.classify(state)
            }
            MsgBody::Status { state: Some(state), .. } => {
                info!(state = %state, "Received login status");
                self.classify(state)
            }
            MsgBody::Status { state: None, .. } => {
                debug!("Received login status without state");
                LoginOutcome::Unchanged
            }
            MsgBody::Update { .. } => {
                debug!("Received login update");
                LoginOutcome::Unchanged
            }
            MsgBody::Close => {
                warn!("Login stream closed by provider");
                self.state = LoginState::Closed;
                LoginOutcome::Closed
            }
            other => {
                warn!(class = %other.class(), "Unexpected login message class");
                LoginOutcome::Unchanged
            }
        }
    }

    fn classify(&mut self, state: &State) -> LoginOutcome {
        if state.stream_state != StreamState::Open {
            warn!(state = %state, "Login denied");
            self.state = LoginState::Denied;
            return LoginOutcome::Denied(state.to_string());
        }
        if state.data_state == DataState::Suspect {
            warn!(state = %state, "Login suspect");
            self.state = LoginState::Suspect;
            return LoginOutcome::Suspect(state.to_string());
        }
        if self.state == LoginState::Established {
            return LoginOutcome::Unchanged;
        }
        info!(state = %state, "Login established");
        self.state = LoginState::Established;
        LoginOutcome::Established
    }

    /// Closing login closes every other stream at the provider
    pub fn close<S: MsgSink + ?Sized>(&mut self, sink: &mut S) -> Result<(), SessionError> {
        if !matches!(self.state, LoginState::Sent | LoginState::Established) {
            return Ok(());
        }
        sink.send_msg(&Msg::close(LOGIN_STREAM_ID, domain::LOGIN))?;
        info!("Login stream closed");
        self.state = LoginState::Closed;
        Ok(())
    }
}

fn log_refresh_attributes(msg: &Msg) {
    if let Some(name) = msg.key_name() {
        info!(user = %name, "Login refresh");
    }
    let Some(attribs) = msg.key.as_ref().and_then(|k| k.attrib.as_ref()) else {
        return;
    };
    for name in [
        attrib::APPLICATION_ID,
        attrib::APPLICATION_NAME,
        attrib::POSITION,
        attrib::SINGLE_OPEN,
        attrib::ALLOW_SUSPECT_DATA,
        attrib::SUPPORT_BATCH_REQUESTS,
        attrib::SUPPORT_OMM_POST,
    ] {
        if let Some(value) = attribs.get(name) {
            info!(attribute = name, value = %value, "Login attribute");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> LoginIdentity {
        LoginIdentity {
            user_name: "jdoe".into(),
            application_id: "256".into(),
            application_name: "ETA Consumer Training".into(),
            position: None,
        }
    }

    fn refresh(stream_state: StreamState, data_state: DataState) -> Msg {
        Msg::refresh(LOGIN_STREAM_ID, domain::LOGIN, State::new(stream_state, data_state))
    }

    #[test]
    fn test_request_is_streaming_with_attributes() {
        let mut stage = LoginStage::new(LoginIdentity {
            position: Some("10.0.0.1/host".into()),
            ..identity()
        });
        let mut sent: Vec<Msg> = Vec::new();
        stage.send_request(&mut sent).unwrap();
        assert_eq!(stage.state(), LoginState::Sent);

        let msg = &sent[0];
        assert_eq!(msg.stream_id, 1);
        assert!(matches!(msg.body, MsgBody::Request { streaming: true, .. }));
        let key = msg.key.as_ref().unwrap();
        assert_eq!(key.name.as_deref(), Some("jdoe"));
        assert_eq!(key.name_type, Some(name_type::USER_NAME));
        let attribs = key.attrib.as_ref().unwrap();
        assert_eq!(attribs.get(attrib::ROLE), Some(&DataValue::UInt(0)));
        assert_eq!(
            attribs.get(attrib::POSITION).and_then(DataValue::as_str),
            Some("10.0.0.1/host")
        );
    }

    #[test]
    fn test_classification() {
        let mut stage = LoginStage::new(identity());
        assert_eq!(
            stage.on_response(&refresh(StreamState::Open, DataState::Ok)),
            LoginOutcome::Established
        );
        // A repeated Open/Ok refresh changes nothing
        assert_eq!(
            stage.on_response(&refresh(StreamState::Open, DataState::NoChange)),
            LoginOutcome::Unchanged
        );

        let mut stage = LoginStage::new(identity());
        assert!(matches!(
            stage.on_response(&refresh(StreamState::ClosedRecover, DataState::Suspect)),
            LoginOutcome::Denied(_)
        ));
        assert_eq!(stage.state(), LoginState::Denied);

        let mut stage = LoginStage::new(identity());
        assert!(matches!(
            stage.on_response(&refresh(StreamState::Open, DataState::Suspect)),
            LoginOutcome::Suspect(_)
        ));
    }

    #[test]
    fn test_status_follows_refresh_rules() {
        let mut stage = LoginStage::new(identity());
        let status = Msg::status(
            LOGIN_STREAM_ID,
            domain::LOGIN,
            Some(State::new(StreamState::Closed, DataState::Suspect).with_text("not entitled")),
        );
        let LoginOutcome::Denied(text) = stage.on_response(&status) else {
            panic!("expected denial");
        };
        assert!(text.contains("not entitled"));
        assert_eq!(
            stage.on_response(&Msg::status(LOGIN_STREAM_ID, domain::LOGIN, None)),
            LoginOutcome::Unchanged
        );
    }

    #[test]
    fn test_close_and_update() {
        let mut stage = LoginStage::new(identity());
        assert_eq!(
            stage.on_response(&Msg::update(LOGIN_STREAM_ID, domain::LOGIN)),
            LoginOutcome::Unchanged
        );
        assert_eq!(
            stage.on_response(&Msg::close(LOGIN_STREAM_ID, domain::LOGIN)),
            LoginOutcome::Closed
        );
    }

    #[test]
    fn test_close_only_after_request() {
        let mut stage = LoginStage::new(identity());
        let mut sent: Vec<Msg> = Vec::new();
        stage.close(&mut sent).unwrap();
        assert!(sent.is_empty());

        stage.send_request(&mut sent).unwrap();
        stage.close(&mut sent).unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].body, MsgBody::Close);
        assert_eq!(stage.state(), LoginState::Closed);
    }

    #[test]
    fn test_identity_prefers_configured_user() {
        let config = LoginConfig {
            user_name: Some("configured".into()),
            ..LoginConfig::default()
        };
        let identity = LoginIdentity::from_config(&config);
        assert_eq!(identity.user_name, "configured");
        assert_eq!(identity.application_id, "256");
    }
}
