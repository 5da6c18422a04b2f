use crate::api::Problem;

pub(crate) type ReqResult<T> = std::result::Result<T, Problem>;

fn transport_problem(url: &str, err: reqwest::Error) -> Problem {
    Problem {
        _type: "httpReqError".to_owned(),
        detail: Some(format!("{url}: {err}")),
        status: err.status().map(|status| status.as_u16()),
        subproblems: None,
    }
}

pub(crate) async fn req_get(http: &reqwest::Client, url: &str) -> ReqResult<reqwest::Response> {
    log::trace!("GET {url}");
    http.get(url)
        .send()
        .await
        .map_err(|err| transport_problem(url, err))
}

pub(crate) async fn req_head(http: &reqwest::Client, url: &str) -> ReqResult<reqwest::Response> {
    log::trace!("HEAD {url}");
    http.head(url)
        .send()
        .await
        .map_err(|err| transport_problem(url, err))
}

pub(crate) async fn req_post(
    http: &reqwest::Client,
    url: &str,
    body: String,
) -> ReqResult<reqwest::Response> {
    log::trace!("POST {url} {body}");
    http.post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/jose+json")
        .body(body)
        .send()
        .await
        .map_err(|err| transport_problem(url, err))
}

/// Turns non-2xx responses into a [`Problem`].
pub(crate) async fn req_handle_error(res: reqwest::Response) -> ReqResult<reqwest::Response> {
    let status = res.status();

    if status.is_success() {
        return Ok(res);
    }

    let is_problem_json = res
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/problem+json"));

    let body = req_safe_read_body(res).await;

    let mut problem = if is_problem_json {
        serde_json::from_str(&body).unwrap_or_else(|err| {
            Problem::new(
                "problemJsonFail",
                format!("Failed to deserialize application/problem+json ({err}) body: {body}"),
            )
        })
    } else {
        Problem::new("httpReqError", format!("{status} body: {body}"))
    };

    problem.status.get_or_insert(status.as_u16());

    Err(problem)
}

pub(crate) fn req_expect_header(res: &reqwest::Response, name: &str) -> ReqResult<String> {
    res.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
        .ok_or_else(|| Problem {
            _type: format!("Missing header: {name}"),
            ..Default::default()
        })
}

pub(crate) async fn req_safe_read_body(res: reqwest::Response) -> String {
    // Some CAs close the TLS connection abruptly after the body, which surfaces as an error even
    // though the content was received; an empty body is the worst case here.
    res.text().await.unwrap_or_default()
}
