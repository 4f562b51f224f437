// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end tests for the command-execution pipeline.

mod admin_tests;
