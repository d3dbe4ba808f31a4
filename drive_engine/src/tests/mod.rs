// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

mod scenario_tests;
mod test_helpers;
