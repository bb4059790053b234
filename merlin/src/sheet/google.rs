//! Google Sheets v4 client.
//!
//! The client is created once per process and shared. The session (access
//! token, numeric worksheet id, verified header layout) is established on
//! first use and discarded after an authentication or network failure, so
//! the following call reconnects.

use std::{path::PathBuf, time::Duration};

use reqwest::{RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::sheet::{
    COLUMN_COUNT, CATEGORY_HEADERS, Color, Error, HEADER_ROWS, LAST_COLUMN, Spreadsheet,
    category_row, column_row, has_layout, row_range,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const NEW_WORKSHEET_ROWS: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub spreadsheet_id: String,
    pub worksheet: String,
    pub api_base: Url,
    pub token: TokenSource,
}

/// Where the bearer token comes from. Minting tokens is left to an external
/// refresher; a token file is re-read on every reconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
    Static(String),
    File(PathBuf),
}

impl TokenSource {
    fn load(&self) -> Result<String, Error> {
        let token = match self {
            Self::Static(token) => token.trim().to_string(),
            Self::File(path) => std::fs::read_to_string(path)
                .map_err(|cause| Error::IO {
                    message: format!("failed to read token file {path:?}"),
                    cause,
                })?
                .trim()
                .to_string(),
        };
        if token.is_empty() {
            return Err(Error::MissingToken(format!("{self:?} holds no token")));
        }
        Ok(token)
    }
}

#[derive(Debug, Clone)]
struct Session {
    token: String,
    sheet_id: i64,
}

pub struct GoogleSheets {
    http: reqwest::Client,
    config: Config,
    session: Mutex<Option<Session>>,
}

impl GoogleSheets {
    pub fn new(config: Config) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("merlin/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            config,
            session: Mutex::new(None),
        })
    }

    async fn session(&self) -> Result<Session, Error> {
        let mut session = self.session.lock().await;
        if let Some(session) = session.as_ref() {
            return Ok(session.clone());
        }
        let established = self.connect().await?;
        info!(
            "spreadsheet session established: {}/{} (sheet id {})",
            self.config.spreadsheet_id, self.config.worksheet, established.sheet_id
        );
        *session = Some(established.clone());
        Ok(established)
    }

    async fn invalidate_on_failure<T>(&self, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(e) = &result
            && e.invalidates_session()
        {
            warn!("discarding spreadsheet session after failure: {e}");
            *self.session.lock().await = None;
        }
        result
    }

    async fn connect(&self) -> Result<Session, Error> {
        let token = self.config.token.load()?;
        let sheet_id = match self.find_sheet_id(&token).await? {
            Some(sheet_id) => sheet_id,
            None => self.add_worksheet(&token).await?,
        };
        let session = Session { token, sheet_id };

        let headers = self
            .get_values(&session, &format!("A1:{LAST_COLUMN}{HEADER_ROWS}"))
            .await?;
        if !has_layout(&headers) {
            info!("writing header rows to worksheet {}", self.config.worksheet);
            self.write_layout(&session).await?;
        }
        Ok(session)
    }

    async fn find_sheet_id(&self, token: &str) -> Result<Option<i64>, Error> {
        let mut url = self.endpoint(&[&self.config.spreadsheet_id])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties(sheetId,title)");
        let body = self.send(token, self.http.get(url)).await?;
        Ok(parse_sheet_id(&body, &self.config.worksheet))
    }

    async fn add_worksheet(&self, token: &str) -> Result<i64, Error> {
        info!("creating worksheet {}", self.config.worksheet);
        let body = self
            .batch_update_with_token(
                token,
                vec![json!({
                    "addSheet": {
                        "properties": {
                            "title": self.config.worksheet,
                            "gridProperties": {
                                "rowCount": NEW_WORKSHEET_ROWS,
                                "columnCount": COLUMN_COUNT,
                            },
                        },
                    },
                })],
            )
            .await?;
        body.pointer("/replies/0/addSheet/properties/sheetId")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::Parse("addSheet reply carries no sheetId".to_string()))
    }

    async fn write_layout(&self, session: &Session) -> Result<(), Error> {
        self.put_values(
            session,
            &format!("A1:{LAST_COLUMN}{HEADER_ROWS}"),
            vec![category_row(), column_row()],
        )
        .await?;
        self.batch_update(session, layout_requests(session.sheet_id))
            .await
            .map(|_| ())
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = self.config.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Parse(format!("invalid API base {}", self.config.api_base)))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets"])
            .extend(segments);
        Ok(url)
    }

    fn values_endpoint(&self, range: &str, suffix: &str) -> Result<Url, Error> {
        let range = format!("{}!{range}{suffix}", self.config.worksheet);
        self.endpoint(&[&self.config.spreadsheet_id, "values", &range])
    }

    async fn send(&self, token: &str, request: RequestBuilder) -> Result<Value, Error> {
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Unauthorized(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http {
                status: status.as_u16(),
                body,
            });
        }
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| Error::Parse(e.to_string()))
    }

    async fn get_values(&self, session: &Session, range: &str) -> Result<Vec<Vec<String>>, Error> {
        let url = self.values_endpoint(range, "")?;
        let body = self.send(&session.token, self.http.get(url)).await?;
        Ok(parse_values(&body))
    }

    async fn put_values(
        &self,
        session: &Session,
        range: &str,
        rows: Vec<Vec<String>>,
    ) -> Result<(), Error> {
        let mut url = self.values_endpoint(range, "")?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        self.send(
            &session.token,
            self.http.put(url).json(&json!({ "values": rows })),
        )
        .await
        .map(|_| ())
    }

    async fn batch_update(&self, session: &Session, requests: Vec<Value>) -> Result<Value, Error> {
        self.batch_update_with_token(&session.token, requests).await
    }

    async fn batch_update_with_token(
        &self,
        token: &str,
        requests: Vec<Value>,
    ) -> Result<Value, Error> {
        let url = self.endpoint(&[&format!("{}:batchUpdate", self.config.spreadsheet_id)])?;
        self.send(
            token,
            self.http.post(url).json(&json!({ "requests": requests })),
        )
        .await
    }
}

#[async_trait::async_trait]
impl Spreadsheet for GoogleSheets {
    async fn values(&self) -> Result<Vec<Vec<String>>, Error> {
        let session = self.session().await?;
        let result = self
            .get_values(&session, &format!("A1:{LAST_COLUMN}"))
            .await;
        self.invalidate_on_failure(result).await
    }

    async fn update_row(&self, row_index: usize, cells: Vec<String>) -> Result<(), Error> {
        let session = self.session().await?;
        let result = self
            .put_values(&session, &row_range(row_index), vec![cells])
            .await
            .inspect(|_| debug!("updated spreadsheet row {row_index}"));
        self.invalidate_on_failure(result).await
    }

    async fn append_row(&self, cells: Vec<String>) -> Result<(), Error> {
        let session = self.session().await?;
        let result = async {
            let mut url = self.values_endpoint(&format!("A1:{LAST_COLUMN}"), ":append")?;
            url.query_pairs_mut()
                .append_pair("valueInputOption", "RAW")
                .append_pair("insertDataOption", "INSERT_ROWS");
            self.send(
                &session.token,
                self.http.post(url).json(&json!({ "values": [cells] })),
            )
            .await
            .map(|_| ())
        }
        .await;
        self.invalidate_on_failure(result).await
    }

    async fn set_row_backgrounds(&self, rows: Vec<(usize, Color)>) -> Result<(), Error> {
        if rows.is_empty() {
            return Ok(());
        }
        let session = self.session().await?;
        let requests = rows
            .into_iter()
            .map(|(row_index, color)| background_request(session.sheet_id, row_index, color))
            .collect();
        let result = self.batch_update(&session, requests).await.map(|_| ());
        self.invalidate_on_failure(result).await
    }

    async fn clear_data_rows(&self) -> Result<(), Error> {
        let session = self.session().await?;
        let result = async {
            let row_count = self
                .get_values(&session, &format!("A1:{LAST_COLUMN}"))
                .await?
                .len();
            if row_count <= HEADER_ROWS {
                return Ok(());
            }
            self.batch_update(
                &session,
                vec![json!({
                    "deleteDimension": {
                        "range": {
                            "sheetId": session.sheet_id,
                            "dimension": "ROWS",
                            "startIndex": HEADER_ROWS,
                            "endIndex": row_count,
                        },
                    },
                })],
            )
            .await
            .map(|_| ())
        }
        .await;
        self.invalidate_on_failure(result).await
    }

    async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }
}

fn parse_sheet_id(body: &Value, worksheet: &str) -> Option<i64> {
    body["sheets"].as_array()?.iter().find_map(|sheet| {
        let properties = &sheet["properties"];
        (properties["title"].as_str() == Some(worksheet))
            .then(|| properties["sheetId"].as_i64())
            .flatten()
    })
}

fn parse_values(body: &Value) -> Vec<Vec<String>> {
    let Some(rows) = body["values"].as_array() else {
        return vec![];
    };
    rows.iter()
        .map(|row| {
            row.as_array()
                .map(|cells| cells.iter().map(cell_text).collect())
                .unwrap_or_default()
        })
        .collect()
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn background_request(sheet_id: i64, row_index: usize, color: Color) -> Value {
    json!({
        "repeatCell": {
            "range": row_grid_range(sheet_id, row_index),
            "cell": { "userEnteredFormat": { "backgroundColor": color } },
            "fields": "userEnteredFormat.backgroundColor",
        },
    })
}

fn row_grid_range(sheet_id: i64, row_index: usize) -> Value {
    json!({
        "sheetId": sheet_id,
        "startRowIndex": row_index - 1,
        "endRowIndex": row_index,
        "startColumnIndex": 0,
        "endColumnIndex": COLUMN_COUNT,
    })
}

fn layout_requests(sheet_id: i64) -> Vec<Value> {
    let mut requests: Vec<Value> = CATEGORY_HEADERS
        .iter()
        .map(|(_, start, end)| {
            json!({
                "mergeCells": {
                    "range": {
                        "sheetId": sheet_id,
                        "startRowIndex": 0,
                        "endRowIndex": 1,
                        "startColumnIndex": start,
                        "endColumnIndex": end,
                    },
                    "mergeType": "MERGE_ALL",
                },
            })
        })
        .collect();
    requests.push(json!({
        "repeatCell": {
            "range": row_grid_range(sheet_id, 1),
            "cell": {
                "userEnteredFormat": {
                    "backgroundColor": Color::CATEGORY_GREY,
                    "horizontalAlignment": "CENTER",
                    "textFormat": { "bold": true, "fontSize": 12 },
                },
            },
            "fields": "userEnteredFormat(backgroundColor,horizontalAlignment,textFormat)",
        },
    }));
    requests.push(json!({
        "repeatCell": {
            "range": row_grid_range(sheet_id, 2),
            "cell": {
                "userEnteredFormat": {
                    "backgroundColor": Color::HEADER_GREY,
                    "textFormat": { "bold": true },
                },
            },
            "fields": "userEnteredFormat(backgroundColor,textFormat)",
        },
    }));
    requests
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use super::*;

    fn client() -> GoogleSheets {
        GoogleSheets::new(Config {
            spreadsheet_id: "sheet-123".to_string(),
            worksheet: "SATS".to_string(),
            api_base: Url::parse("https://sheets.example.test/").unwrap(),
            token: TokenSource::Static("token".to_string()),
        })
        .unwrap()
    }

    #[test]
    fn endpoints() {
        let client = client();
        assert_eq!(
            client.values_endpoint("A3:Q3", "").unwrap().as_str(),
            "https://sheets.example.test/v4/spreadsheets/sheet-123/values/SATS!A3:Q3"
        );
        assert_eq!(
            client.values_endpoint("A1:Q", ":append").unwrap().as_str(),
            "https://sheets.example.test/v4/spreadsheets/sheet-123/values/SATS!A1:Q:append"
        );
        assert_eq!(
            client.endpoint(&["sheet-123:batchUpdate"]).unwrap().as_str(),
            "https://sheets.example.test/v4/spreadsheets/sheet-123:batchUpdate"
        );
    }

    #[test]
    fn sheet_id_lookup() {
        let body = json!({
            "sheets": [
                { "properties": { "sheetId": 0, "title": "Sheet1" } },
                { "properties": { "sheetId": 77, "title": "SATS" } },
            ],
        });
        assert_eq!(parse_sheet_id(&body, "SATS"), Some(77));
        assert_eq!(parse_sheet_id(&body, "Missing"), None);
    }

    #[test]
    fn values_are_read_as_text() {
        let body = json!({
            "range": "SATS!A1:Q3",
            "values": [["AWB Information"], [], ["SQ321", 12, null]],
        });
        assert_eq!(
            parse_values(&body),
            vec![
                vec!["AWB Information".to_string()],
                vec![],
                vec!["SQ321".to_string(), "12".to_string(), String::new()],
            ]
        );
        assert!(parse_values(&json!({ "range": "SATS!A1:Q" })).is_empty());
    }

    #[test]
    fn background_request_covers_whole_row() {
        let request = background_request(77, 3, Color::DISCREPANCY_RED);
        let range = &request["repeatCell"]["range"];
        assert_eq!(range["sheetId"], 77);
        assert_eq!(range["startRowIndex"], 2);
        assert_eq!(range["endRowIndex"], 3);
        assert_eq!(range["endColumnIndex"], COLUMN_COUNT);
        let color = &request["repeatCell"]["cell"]["userEnteredFormat"]["backgroundColor"];
        assert_eq!(color["red"], 1.0);
        assert!((color["green"].as_f64().unwrap() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn layout_merges_three_categories() {
        let requests = layout_requests(5);
        let merges: Vec<_> = requests
            .iter()
            .filter_map(|request| request.get("mergeCells"))
            .map(|merge| {
                (
                    merge["range"]["startColumnIndex"].as_u64().unwrap(),
                    merge["range"]["endColumnIndex"].as_u64().unwrap(),
                )
            })
            .collect();
        assert_eq!(merges, vec![(0, 9), (9, 12), (12, 17)]);
    }

    #[test]
    fn token_sources() {
        assert_eq!(
            TokenSource::Static(" abc \n".to_string()).load().unwrap(),
            "abc"
        );
        assert!(matches!(
            TokenSource::Static(String::new()).load(),
            Err(Error::MissingToken(_))
        ));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        assert!(matches!(
            TokenSource::File(path.clone()).load(),
            Err(Error::IO { .. })
        ));
        std::fs::write(&path, "from-file\n").unwrap();
        assert_eq!(TokenSource::File(path).load().unwrap(), "from-file");
    }

    fn mock_client(server: &MockServer) -> GoogleSheets {
        GoogleSheets::new(Config {
            spreadsheet_id: "sheet-123".to_string(),
            worksheet: "SATS".to_string(),
            api_base: Url::parse(&server.base_url()).unwrap(),
            token: TokenSource::Static("token".to_string()),
        })
        .unwrap()
    }

    fn metadata(sheets: &[(i64, &str)]) -> Value {
        let sheets: Vec<Value> = sheets
            .iter()
            .map(|(sheet_id, title)| json!({ "properties": { "sheetId": sheet_id, "title": title } }))
            .collect();
        json!({ "sheets": sheets })
    }

    async fn mock_existing_worksheet(server: &MockServer) -> (httpmock::Mock<'_>, httpmock::Mock<'_>) {
        let metadata_mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v4/spreadsheets/sheet-123")
                    .header("authorization", "Bearer token");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(metadata(&[(0, "Sheet1"), (77, "SATS")]));
            })
            .await;
        let header_mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/v4/spreadsheets/sheet-123/values/SATS!A1:Q2");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({ "values": [category_row(), column_row()] }));
            })
            .await;
        (metadata_mock, header_mock)
    }

    #[test_log::test(tokio::test)]
    async fn unauthorized_response_drops_session_and_reconnects() {
        let server = MockServer::start_async().await;
        let (metadata_mock, _header_mock) = mock_existing_worksheet(&server).await;
        let rejected = server
            .mock_async(|when, then| {
                when.method(GET).path("/v4/spreadsheets/sheet-123/values/SATS!A1:Q");
                then.status(401).body("token expired");
            })
            .await;
        let client = mock_client(&server);

        let err = client.values().await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        assert!(!client.is_connected().await);
        metadata_mock.assert_hits_async(1).await;

        rejected.delete_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v4/spreadsheets/sheet-123/values/SATS!A1:Q");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({
                        "values": [category_row(), column_row(), ["SQ321", "", "", "MAWB1001"]],
                    }));
            })
            .await;

        let values = client.values().await.unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values[2][3], "MAWB1001");
        assert!(client.is_connected().await);
        metadata_mock.assert_hits_async(2).await;
    }

    #[test_log::test(tokio::test)]
    async fn missing_worksheet_is_created_with_headers() {
        let server = MockServer::start_async().await;
        let metadata_mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/v4/spreadsheets/sheet-123");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(metadata(&[(0, "Sheet1")]));
            })
            .await;
        let add_sheet_mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v4/spreadsheets/sheet-123:batchUpdate")
                    .json_body(json!({
                        "requests": [{
                            "addSheet": {
                                "properties": {
                                    "title": "SATS",
                                    "gridProperties": {
                                        "rowCount": NEW_WORKSHEET_ROWS,
                                        "columnCount": COLUMN_COUNT,
                                    },
                                },
                            },
                        }],
                    }));
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({
                        "replies": [{ "addSheet": { "properties": { "sheetId": 91 } } }],
                    }));
            })
            .await;
        let header_mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/v4/spreadsheets/sheet-123/values/SATS!A1:Q2");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({ "range": "SATS!A1:Q2" }));
            })
            .await;
        let header_write_mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/v4/spreadsheets/sheet-123/values/SATS!A1:Q2")
                    .query_param("valueInputOption", "RAW")
                    .json_body(json!({ "values": [category_row(), column_row()] }));
                then.status(200).json_body(json!({}));
            })
            .await;
        let layout_mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v4/spreadsheets/sheet-123:batchUpdate")
                    .json_body(json!({ "requests": layout_requests(91) }));
                then.status(200).json_body(json!({ "replies": [] }));
            })
            .await;
        let values_mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/v4/spreadsheets/sheet-123/values/SATS!A1:Q");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({ "values": [category_row(), column_row()] }));
            })
            .await;
        let client = mock_client(&server);

        let values = client.values().await.unwrap();
        assert_eq!(values.len(), HEADER_ROWS);
        assert!(client.is_connected().await);

        metadata_mock.assert_async().await;
        add_sheet_mock.assert_async().await;
        header_mock.assert_async().await;
        header_write_mock.assert_async().await;
        layout_mock.assert_async().await;
        values_mock.assert_async().await;
    }

    #[test_log::test(tokio::test)]
    async fn append_inserts_raw_rows_and_reuses_session() {
        let server = MockServer::start_async().await;
        let (metadata_mock, header_mock) = mock_existing_worksheet(&server).await;
        let cells: Vec<String> = (0..COLUMN_COUNT).map(|i| format!("c{i}")).collect();
        let append_mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v4/spreadsheets/sheet-123/values/SATS!A1:Q:append")
                    .query_param("valueInputOption", "RAW")
                    .query_param("insertDataOption", "INSERT_ROWS")
                    .header("authorization", "Bearer token")
                    .json_body(json!({ "values": [cells.clone()] }));
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({ "updates": { "updatedRows": 1 } }));
            })
            .await;
        let client = mock_client(&server);

        client.append_row(cells.clone()).await.unwrap();
        client.append_row(cells).await.unwrap();

        append_mock.assert_hits_async(2).await;
        metadata_mock.assert_hits_async(1).await;
        header_mock.assert_hits_async(1).await;
    }
}
