//! Integration tests for bucketsync-storage
//!
//! Uses wiremock to simulate WebDAV and S3-compatible servers and verifies
//! the requests each backend sends and how it interprets the responses.


mod test_s3;
