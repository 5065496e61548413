//! A wrapper around `reqwest::Client` providing typed access to the beacon
//! node endpoints the duty monitor consumes.

use crate::types::{
    ConfigSpec, Epoch, GenericResponse, GenesisData, ProposerData, PublicKeyHex, SyncDuty,
    SyncingData, ValidatorData, ValidatorIndexDataRef, ValidatorsRequestBody,
};
use reqwest::{IntoUrl, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::time::Duration;
use url::Url;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum Error {
    /// The `reqwest` client raised an error.
    HttpClient(reqwest::Error),
    /// The server returned an error message where the body was able to be parsed.
    ServerMessage(crate::types::ErrorMessage),
    /// The server returned an error message where the body was unable to be parsed.
    StatusCode(StatusCode),
    /// The supplied URL is badly formatted. It should look something like `http://127.0.0.1:5052`.
    InvalidUrl(Url),
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Error::HttpClient(error)
    }
}

impl Error {
    /// If the error has a HTTP status code, return it.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::HttpClient(error) => error.status(),
            Error::ServerMessage(msg) => StatusCode::from_u16(msg.code).ok(),
            Error::StatusCode(status) => Some(*status),
            Error::InvalidUrl(_) => None,
        }
    }

    /// True for transport-level failures (refused connections, timeouts);
    /// false for any response the server actually produced.
    pub fn is_network(&self) -> bool {
        match self {
            Error::HttpClient(error) => !error.is_status() && !error.is_decode(),
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Per-operation timeouts so a slow endpoint cannot stall the whole tick.
#[derive(Clone)]
pub struct Timeouts {
    pub spec: Duration,
    pub genesis: Duration,
    pub syncing: Duration,
    pub validators: Duration,
    pub proposer_duties: Duration,
    pub sync_duties: Duration,
}

impl Timeouts {
    pub fn set_all(timeout: Duration) -> Self {
        Timeouts {
            spec: timeout,
            genesis: timeout,
            syncing: timeout,
            validators: timeout,
            proposer_duties: timeout,
            sync_duties: timeout,
        }
    }
}

/// A wrapper around `reqwest::Client` which provides convenience methods for
/// interfacing with a beacon node HTTP server.
#[derive(Clone)]
pub struct BeaconNodeHttpClient {
    client: reqwest::Client,
    server: Url,
    timeouts: Timeouts,
}

impl fmt::Display for BeaconNodeHttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.server.fmt(f)
    }
}

impl BeaconNodeHttpClient {
    pub fn new(server: Url, timeouts: Timeouts) -> Self {
        Self {
            client: reqwest::Client::new(),
            server,
            timeouts,
        }
    }

    /// Return the path with the standard `/eth/v1` prefix applied.
    fn eth_path(&self) -> Result<Url, Error> {
        let mut path = self.server.clone();

        path.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(self.server.clone()))?
            .push("eth")
            .push("v1");

        Ok(path)
    }

    /// Perform a HTTP GET request with a custom timeout.
    async fn get_with_timeout<T: DeserializeOwned, U: IntoUrl>(
        &self,
        url: U,
        timeout: Duration,
    ) -> Result<T, Error> {
        let response = self.client.get(url).timeout(timeout).send().await?;
        let response = ok_or_error(response).await?;
        Ok(response.json().await?)
    }

    /// Perform a HTTP POST request with a custom timeout.
    async fn post_with_timeout<T: Serialize + ?Sized, R: DeserializeOwned, U: IntoUrl>(
        &self,
        url: U,
        body: &T,
        timeout: Duration,
    ) -> Result<R, Error> {
        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        let response = ok_or_error(response).await?;
        Ok(response.json().await?)
    }

    /// `GET config/spec`
    pub async fn get_config_spec(&self) -> Result<GenericResponse<ConfigSpec>, Error> {
        let mut path = self.eth_path()?;

        path.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(self.server.clone()))?
            .push("config")
            .push("spec");

        self.get_with_timeout(path, self.timeouts.spec).await
    }

    /// `GET beacon/genesis`
    pub async fn get_beacon_genesis(&self) -> Result<GenericResponse<GenesisData>, Error> {
        let mut path = self.eth_path()?;

        path.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(self.server.clone()))?
            .push("beacon")
            .push("genesis");

        self.get_with_timeout(path, self.timeouts.genesis).await
    }

    /// `GET node/syncing`
    pub async fn get_node_syncing(&self) -> Result<GenericResponse<SyncingData>, Error> {
        let mut path = self.eth_path()?;

        path.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(self.server.clone()))?
            .push("node")
            .push("syncing");

        self.get_with_timeout(path, self.timeouts.syncing).await
    }

    /// `POST beacon/states/head/validators`
    ///
    /// A single batched lookup of the full watched set.
    pub async fn post_beacon_states_validators(
        &self,
        ids: &[PublicKeyHex],
    ) -> Result<GenericResponse<Vec<ValidatorData>>, Error> {
        let mut path = self.eth_path()?;

        path.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(self.server.clone()))?
            .push("beacon")
            .push("states")
            .push("head")
            .push("validators");

        self.post_with_timeout(path, &ValidatorsRequestBody { ids }, self.timeouts.validators)
            .await
    }

    /// `GET validator/duties/proposer/{epoch}`
    pub async fn get_validator_duties_proposer(
        &self,
        epoch: Epoch,
    ) -> Result<GenericResponse<Vec<ProposerData>>, Error> {
        let mut path = self.eth_path()?;

        path.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(self.server.clone()))?
            .push("validator")
            .push("duties")
            .push("proposer")
            .push(&epoch.to_string());

        self.get_with_timeout(path, self.timeouts.proposer_duties)
            .await
    }

    /// `POST validator/duties/sync/{epoch}`
    pub async fn post_validator_duties_sync(
        &self,
        epoch: Epoch,
        indices: &[u64],
    ) -> Result<GenericResponse<Vec<SyncDuty>>, Error> {
        let mut path = self.eth_path()?;

        path.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(self.server.clone()))?
            .push("validator")
            .push("duties")
            .push("sync")
            .push(&epoch.to_string());

        self.post_with_timeout(
            path,
            &ValidatorIndexDataRef(indices),
            self.timeouts.sync_duties,
        )
        .await
    }
}

/// Returns `Ok(response)` if the response is a `200 OK` response. Otherwise,
/// creates an appropriate error message.
async fn ok_or_error(response: Response) -> Result<Response, Error> {
    let status = response.status();

    if status == StatusCode::OK {
        Ok(response)
    } else if let Ok(message) = response.json().await {
        Err(Error::ServerMessage(message))
    } else {
        Err(Error::StatusCode(status))
    }
}
